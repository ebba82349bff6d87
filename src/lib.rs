//! # Stache Native Compiler
//!
//! Compiles `{{...}}` templates into JavaScript source for a CommonJS module
//! with a single `render(data)` operation.
//!
//! ## Pipeline
//!
//! 1. **Scan**: `scanner` splits text into literal spans and tags.
//! 2. **Dispatch**: `parse` (flat) or `markup` (structural) builds template IR,
//!    tracking open blocks on a scope stack. Close tags pop by position only.
//! 3. **Emit**: `codegen` turns IR into ordered fragments, one synthetic
//!    context variable per block depth (`data`, `data$1`, ...).
//! 4. **Assemble**: `finalize` embeds the minimal helper set and the body into
//!    the module wrapper.
//!
//! ## Compile Invariants
//!
//! 1. Compilation is a pure function of template text and options: the same
//!    input always yields byte-identical code.
//! 2. `safeAccess` is always embedded; `merge`, `toArray` and `spread` only
//!    when a section or inverted section appears.
//! 3. The only compile errors are an unexpected block close (with name and
//!    line) and a missing block end; everything else degrades to interpolation.
//!
//! `render` evaluates the same IR natively against JSON data, with the
//! semantics the generated module has at runtime.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod codegen;
mod config;
pub mod discovery;
mod finalize;
mod helpers;
mod markup;
mod parse;
mod render;
mod scanner;
mod scope;
mod validate;


pub use codegen::{emit_body, escape_js_string, EmittedBody, JoinMode};
pub use config::{CompileOptions, ConfigError, InvertedPolicy, SectionCallable, Target};
pub use finalize::{
    assemble, compile, compile_template, verify_output, CompiledUnit, Template, ANONYMOUS_TEMPLATE,
};
pub use helpers::{Helper, HelperSet, HelperUsage};
pub use parse::{dispatch, parse_template};
pub use render::{
    safe_access, to_array, to_js_string, truthy, NoPartials, PartialResolver, RenderedNode,
};
pub use scanner::{line_at, scan, tag_location, Scanner, Segment, Sigil, Tag};
pub use scope::{context_var, Scope, ScopeKind, ScopeStack};
pub use validate::*;

#[cfg(feature = "napi")]
pub use finalize::compile_template_native;

#[cfg(feature = "napi")]
#[napi]
pub fn compile_bridge() -> String {
    "Stache Native Bridge Connected".to_string()
}
