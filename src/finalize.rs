//! Finalize Module
//!
//! Assembles an emitted body and its helper set into a loadable CommonJS
//! module exposing `render(data)`. The wrapper is a fixed template per target
//! with `{{helperFunctions}}` and `{{render}}` placeholders, substituted in a
//! single pass so text inside either value is never rescanned.

use lazy_static::lazy_static;
#[cfg(feature = "napi")]
use napi_derive::napi;
use oxc_allocator::Allocator;
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::codegen::{emit_body, EmittedBody};
use crate::config::{CompileOptions, Target};
use crate::helpers::HelperSet;
use crate::parse::parse_template;
use crate::render::{render_nodes, render_to_string, PartialResolver, RenderedNode};
use crate::validate::{CompilerError, TemplateIR, ERR_INVALID_OUTPUT};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{\{([^}]+)\}\}").unwrap();
}

const FLAT_WRAPPER: &str = "module.exports = (function () {
{{helperFunctions}}

\treturn {
\t\trender: function (data) {
\t\t\treturn [].concat({{render}}'').join('');
\t\t}
\t};
}());
";

const STRUCTURAL_WRAPPER: &str = "module.exports = (function () {
{{helperFunctions}}

\treturn {
\t\trender: function (data) {
\t\t\treturn [].concat({{render}}[]);
\t\t}
\t};
}());
";

/// File name used when a template is compiled from a bare string.
pub const ANONYMOUS_TEMPLATE: &str = "<template>";

/// A finished compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledUnit {
    /// Complete module source.
    pub code: String,
    /// The fragment run placed inside `render`.
    pub body: String,
    /// Embedded helper names, in embedding order.
    pub helpers: Vec<String>,
    pub target: Target,
}

fn wrapper_for(target: Target) -> &'static str {
    match target {
        Target::Flat => FLAT_WRAPPER,
        Target::Structural => STRUCTURAL_WRAPPER,
    }
}

/// Substitute `{{name}}` placeholders in `template`. Unknown names are left as written.
fn substitute(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Wrap an emitted body into a complete module.
pub fn assemble(emitted: &EmittedBody, target: Target, options: &CompileOptions) -> CompiledUnit {
    let helpers = HelperSet::select(emitted.usage);
    let helper_source = helpers.render(options);

    let code = substitute(wrapper_for(target), |name| match name {
        "helperFunctions" => Some(helper_source.clone()),
        "render" => Some(emitted.code.clone()),
        _ => None,
    });

    CompiledUnit {
        code,
        body: emitted.code.clone(),
        helpers: helpers.names(),
        target,
    }
}

/// Check that `code` parses as a JavaScript script.
pub fn verify_output(code: &str, file_path: &str) -> Result<(), CompilerError> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(false);
    let ret = Parser::new(&allocator, code, source_type).parse();

    if ret.errors.is_empty() {
        return Ok(());
    }

    let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
    Err(CompilerError::with_details(
        ERR_INVALID_OUTPUT,
        &format!("Generated code does not parse: {}", messages.join("; ")),
        file_path,
        0,
        0,
        None,
        vec!["This is a compiler bug. Please report the template that triggered it.".to_string()],
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILE API
// ═══════════════════════════════════════════════════════════════════════════════

/// Compile template text for the flat target with default options.
pub fn compile(source: &str) -> Result<CompiledUnit, CompilerError> {
    compile_template(source, ANONYMOUS_TEMPLATE, &CompileOptions::default())
}

/// Compile template text into a render module.
pub fn compile_template(
    source: &str,
    file_path: &str,
    options: &CompileOptions,
) -> Result<CompiledUnit, CompilerError> {
    let ir = parse_template(source, file_path, options)?;
    compile_ir(&ir, options)
}

fn compile_ir(ir: &TemplateIR, options: &CompileOptions) -> Result<CompiledUnit, CompilerError> {
    let emitted = emit_body(ir, options);
    let unit = assemble(&emitted, ir.target, options);
    debug!(
        file = %ir.file_path,
        helpers = ?unit.helpers,
        bytes = unit.code.len(),
        "assembled render module"
    );

    if options.verify_output {
        verify_output(&unit.code, &ir.file_path)?;
        info!(file = %ir.file_path, "verified generated code");
    }
    Ok(unit)
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_template_native(
    source: String,
    file_path: String,
    options_json: Option<String>,
) -> napi::Result<serde_json::Value> {
    let options = match options_json {
        Some(json) => CompileOptions::from_json_str(&json)
            .map_err(|e| napi::Error::from_reason(e.to_string()))?,
        None => CompileOptions::default(),
    };
    let unit = compile_template(&source, &file_path, &options)
        .map_err(|e| napi::Error::from_reason(e.message))?;
    serde_json::to_value(unit).map_err(|e| napi::Error::from_reason(e.to_string()))
}

/// A parsed template bound to the options it was parsed with.
#[derive(Debug, Clone)]
pub struct Template {
    ir: TemplateIR,
    options: CompileOptions,
}

impl Template {
    pub fn parse(source: &str, options: &CompileOptions) -> Result<Self, CompilerError> {
        Self::parse_named(source, ANONYMOUS_TEMPLATE, options)
    }

    pub fn parse_named(
        source: &str,
        file_path: &str,
        options: &CompileOptions,
    ) -> Result<Self, CompilerError> {
        Ok(Self {
            ir: parse_template(source, file_path, options)?,
            options: options.clone(),
        })
    }

    pub fn ir(&self) -> &TemplateIR {
        &self.ir
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile(&self) -> Result<CompiledUnit, CompilerError> {
        compile_ir(&self.ir, &self.options)
    }

    /// Render against `data`, producing the string the flat module would return.
    pub fn render(&self, data: &Value, partials: &dyn PartialResolver) -> String {
        render_to_string(&self.ir.nodes, data, partials, &self.options)
    }

    /// Render against `data`, producing the list the structural module would return.
    pub fn render_nodes(&self, data: &Value, partials: &dyn PartialResolver) -> Vec<RenderedNode> {
        render_nodes(&self.ir.nodes, data, partials, &self.options)
    }
}
