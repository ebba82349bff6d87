#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};

use crate::config::Target;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_UNEXPECTED_BLOCK_CLOSE: &str = "STACHE-E001";
pub const ERR_MISSING_BLOCK_END: &str = "STACHE-E002";
pub const ERR_MARKUP_PARSE: &str = "STACHE-E003";
pub const ERR_INVALID_OUTPUT: &str = "STACHE-E004";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_UNEXPECTED_BLOCK_CLOSE => "Every block close tag closes exactly one open block.",
        ERR_MISSING_BLOCK_END => "Every open block is closed before the end of the template.",
        ERR_MARKUP_PARSE => "Structural templates are readable as host markup.",
        ERR_INVALID_OUTPUT => "Compiled render modules are syntactically valid JavaScript.",
        _ => "Unknown invariant.",
    }
}

fn get_error_type(code: &str) -> &'static str {
    match code {
        ERR_UNEXPECTED_BLOCK_CLOSE | ERR_MISSING_BLOCK_END => "BLOCK_STRUCTURE",
        ERR_MARKUP_PARSE => "MARKUP",
        _ => "COMPILER_INVARIANT_VIOLATION",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, file, line, column, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: get_error_type(code).to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            line,
            column,
            context,
            hints,
        }
    }

    /// A close tag arrived while no block was open.
    pub fn unexpected_block_close(name: &str, file: &str, location: SourceLocation) -> Self {
        Self::with_details(
            ERR_UNEXPECTED_BLOCK_CLOSE,
            &format!("Unexpected end of block: {} line {}", name, location.line),
            file,
            location.line,
            location.column,
            Some(format!("{{{{/{}}}}}", name)),
            vec!["Remove the stray close tag or add the matching {{#...}} open tag.".to_string()],
        )
    }

    /// The template ended with at least one block still open. Carries no location.
    pub fn missing_block_end(file: &str) -> Self {
        Self::new(ERR_MISSING_BLOCK_END, "Missing end of block", file, 0, 0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IR TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Text(TextNode),
    Interpolation(InterpolationNode),
    Section(SectionNode),
    InvertedSection(SectionNode),
    Partial(PartialNode),
    Element(ElementNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolationNode {
    pub expression: String,
    /// `false` for the triple-brace form.
    pub escape: bool,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionNode {
    pub expression: String,
    pub body: Vec<TemplateNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialNode {
    pub name: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    pub attributes: Vec<AttributeIR>,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Static(String),
    Dynamic(Vec<TemplateNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeIR {
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateIR {
    pub file_path: String,
    pub target: Target,
    pub nodes: Vec<TemplateNode>,
}

impl TemplateIR {
    /// Whether any section or inverted section appears, including inside
    /// elements and dynamic attribute values.
    pub fn uses_blocks(&self) -> bool {
        nodes_use_blocks(&self.nodes)
    }
}

fn nodes_use_blocks(nodes: &[TemplateNode]) -> bool {
    nodes.iter().any(|node| match node {
        TemplateNode::Section(_) | TemplateNode::InvertedSection(_) => true,
        TemplateNode::Element(el) => {
            nodes_use_blocks(&el.children)
                || el.attributes.iter().any(|attr| match &attr.value {
                    AttributeValue::Dynamic(parts) => nodes_use_blocks(parts),
                    AttributeValue::Static(_) => false,
                })
        }
        _ => false,
    })
}
