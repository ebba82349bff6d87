//! Compile options.
//!
//! Options are plain data: they are passed by reference into every compile and
//! can be loaded from a JSON file (camelCase keys, every key optional).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What the generated render operation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// A single output string.
    #[default]
    Flat,
    /// An array of text strings and `{ tag, attrs, children }` element objects.
    Structural,
}

/// When an inverted section (`{{^expr}}`) is hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InvertedPolicy {
    /// Hidden iff the value is truthy and is a boolean, has `length > 0`, or is not an array.
    #[default]
    ArrayAware,
    /// Hidden iff the value is truthy and is a boolean or has `length > 0`.
    LengthOnly,
}

/// How a section invokes a callable value resolved from its expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SectionCallable {
    #[default]
    WithContext,
    NoArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompileOptions {
    pub target: Target,
    pub inverted_policy: InvertedPolicy,
    pub section_callable: SectionCallable,
    /// Appended to a partial's name to locate its sibling compiled unit.
    pub partial_extension: String,
    /// Parse the assembled module before returning it.
    pub verify_output: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: Target::Flat,
            inverted_policy: InvertedPolicy::ArrayAware,
            section_callable: SectionCallable::WithContext,
            partial_extension: ".js".to_string(),
            verify_output: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl CompileOptions {
    pub fn structural() -> Self {
        Self {
            target: Target::Structural,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&data)
    }
}
