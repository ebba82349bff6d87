//! Helper Library
//!
//! The four runtime helpers are fixed JavaScript source texts. A compiled unit
//! embeds each at most once, and only when a feature that needs it was used:
//! `safeAccess` always, `merge`/`toArray`/`spread` together whenever any block
//! appears.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CompileOptions, SectionCallable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Helper {
    SafeAccess,
    Merge,
    ToArray,
    Spread,
}

const SAFE_ACCESS_SOURCE: &str = r#"function safeAccess(obj, attrs, escape) {
	var originalObject = obj;
	if (!attrs) return obj;
	if (attrs[0] === '.') {
		return obj[attrs];
	}
	var parts = attrs.split(' ');
	attrs = parts[0].split('.');
	while (attrs.length > 0 && obj != null && typeof (obj = obj[attrs.shift()]) !== 'undefined');
	if (typeof obj === 'string' && escape === true) {
		return obj.replace(/&/g, '&amp;').replace(/</g, '&lt;').replace(/"/g, '&quot;').replace(/>/g, '&gt;');
	} else if (typeof obj === 'function') {
		return obj.apply(originalObject, parts.slice(1));
	} else {
		return typeof obj === 'number' ? obj : (obj || '');
	}
}"#;

const MERGE_SOURCE: &str = r#"function merge(target) {
	[].slice.call(arguments, 1).forEach(function (arg) {
		for (var all in arg) {
			target[all] = arg[all];
		}
	});
	return target;
}"#;

const TO_ARRAY_WITH_CONTEXT_SOURCE: &str = r#"function toArray(data, value) {
	var dataValue = safeAccess(data, value);
	if (dataValue) {
		var arrayPrototype = Object.getPrototypeOf([]);
		var valuePrototype = 'object' === typeof dataValue && Object.getPrototypeOf(dataValue) || false;
		if (valuePrototype && (valuePrototype === arrayPrototype || Object.getPrototypeOf(valuePrototype) === arrayPrototype)) {
			return dataValue;
		} else if (typeof dataValue === 'function') {
			return dataValue(data);
		} else return [dataValue];
	} else {
		return [];
	}
}"#;

const TO_ARRAY_NO_ARGS_SOURCE: &str = r#"function toArray(data, value) {
	var dataValue = safeAccess(data, value);
	if (dataValue) {
		var arrayPrototype = Object.getPrototypeOf([]);
		var valuePrototype = 'object' === typeof dataValue && Object.getPrototypeOf(dataValue) || false;
		if (valuePrototype && (valuePrototype === arrayPrototype || Object.getPrototypeOf(valuePrototype) === arrayPrototype)) {
			return dataValue;
		} else if (typeof dataValue === 'function') {
			return dataValue();
		} else return [dataValue];
	} else {
		return [];
	}
}"#;

const SPREAD_SOURCE: &str = r#"function spread(array) {
	var result = [];
	array.forEach(function (entry) {
		result = result.concat(entry);
	});
	return result;
}"#;

impl Helper {
    /// Embedding order.
    pub const ALL: [Helper; 4] = [
        Helper::SafeAccess,
        Helper::Merge,
        Helper::ToArray,
        Helper::Spread,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Helper::SafeAccess => "safeAccess",
            Helper::Merge => "merge",
            Helper::ToArray => "toArray",
            Helper::Spread => "spread",
        }
    }

    pub fn source(self, options: &CompileOptions) -> &'static str {
        match self {
            Helper::SafeAccess => SAFE_ACCESS_SOURCE,
            Helper::Merge => MERGE_SOURCE,
            Helper::ToArray => match options.section_callable {
                SectionCallable::WithContext => TO_ARRAY_WITH_CONTEXT_SOURCE,
                SectionCallable::NoArgs => TO_ARRAY_NO_ARGS_SOURCE,
            },
            Helper::Spread => SPREAD_SOURCE,
        }
    }
}

/// Language features exercised while emitting a body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HelperUsage {
    pub uses_block: bool,
}

/// The minimal helper set for a body, in embedding order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperSet {
    helpers: Vec<Helper>,
}

impl HelperSet {
    pub fn select(usage: HelperUsage) -> Self {
        let helpers: Vec<Helper> = Helper::ALL
            .into_iter()
            .filter(|helper| match helper {
                Helper::SafeAccess => true,
                Helper::Merge | Helper::ToArray | Helper::Spread => usage.uses_block,
            })
            .collect();
        debug!(
            helpers = ?helpers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            "selected runtime helpers"
        );
        Self { helpers }
    }

    pub fn contains(&self, helper: Helper) -> bool {
        self.helpers.contains(&helper)
    }

    pub fn names(&self) -> Vec<String> {
        self.helpers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Helper> + '_ {
        self.helpers.iter().copied()
    }

    /// Helper sources joined for embedding in the wrapper.
    pub fn render(&self, options: &CompileOptions) -> String {
        self.helpers
            .iter()
            .map(|h| h.source(options))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
