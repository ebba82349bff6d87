//! Parse Module
//!
//! Dispatches the scanner's tag stream by sigil into a template IR tree. Block
//! tags push and pop scopes; close tags are matched by position only, so
//! `{{#a}}...{{/anything}}` closes `a`.

use tracing::trace;

use crate::config::{CompileOptions, Target};
use crate::markup::parse_markup;
use crate::scanner::{scan, tag_location, Segment, Sigil, Tag};
use crate::scope::{ScopeKind, ScopeStack};
use crate::validate::{
    CompilerError, InterpolationNode, PartialNode, SectionNode, TemplateIR, TemplateNode, TextNode,
};

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds IR from literal spans and tags fed in source order.
///
/// `bodies[0]` is the root; every open scope owns the body above it, so
/// `bodies.len() == scopes.depth() + 1` holds between calls.
pub struct Dispatcher<'s> {
    source: &'s str,
    file_path: &'s str,
    scopes: ScopeStack,
    bodies: Vec<Vec<TemplateNode>>,
}

impl<'s> Dispatcher<'s> {
    /// `source` is the text tag offsets refer to; it is only read for error locations.
    pub fn new(source: &'s str, file_path: &'s str) -> Self {
        Self {
            source,
            file_path,
            scopes: ScopeStack::new(),
            bodies: vec![Vec::new()],
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.depth()
    }

    fn body(&mut self) -> &mut Vec<TemplateNode> {
        let top = self.bodies.len() - 1;
        &mut self.bodies[top]
    }

    pub fn literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.body().push(TemplateNode::Text(TextNode {
            value: text.to_string(),
        }));
    }

    pub fn node(&mut self, node: TemplateNode) {
        self.body().push(node);
    }

    pub fn tag(&mut self, tag: &Tag<'_>) -> Result<(), CompilerError> {
        let location = tag_location(self.source, tag);
        let expression = tag.expression();
        let sigil = tag.sigil();
        trace!(?sigil, expression, depth = self.depth(), "dispatch tag");

        match sigil {
            Sigil::BlockOpen => {
                self.scopes.push(ScopeKind::Section, expression, location);
                self.bodies.push(Vec::new());
            }
            Sigil::InvertedOpen => {
                self.scopes.push(ScopeKind::Inverted, expression, location);
                self.bodies.push(Vec::new());
            }
            Sigil::BlockClose => {
                let scope = self.scopes.pop().ok_or_else(|| {
                    CompilerError::unexpected_block_close(expression, self.file_path, location)
                })?;
                let body = self.bodies.pop().unwrap_or_default();
                let section = SectionNode {
                    expression: scope.expression,
                    body,
                    location: scope.location,
                };
                let node = match scope.kind {
                    ScopeKind::Section => TemplateNode::Section(section),
                    ScopeKind::Inverted => TemplateNode::InvertedSection(section),
                };
                self.body().push(node);
            }
            Sigil::Partial => self.body().push(TemplateNode::Partial(PartialNode {
                name: expression.to_string(),
                location,
            })),
            Sigil::Comment => {}
            Sigil::Raw | Sigil::None => {
                self.body().push(TemplateNode::Interpolation(InterpolationNode {
                    expression: expression.to_string(),
                    escape: sigil == Sigil::None,
                    location,
                }))
            }
        }
        Ok(())
    }

    /// Close out the root body. Fails if any block is still open.
    pub fn finish(mut self) -> Result<Vec<TemplateNode>, CompilerError> {
        if !self.scopes.is_empty() {
            return Err(CompilerError::missing_block_end(self.file_path));
        }
        Ok(self.bodies.pop().unwrap_or_default())
    }
}

/// Scan and dispatch a whole flat template.
pub fn dispatch(source: &str, file_path: &str) -> Result<Vec<TemplateNode>, CompilerError> {
    let mut dispatcher = Dispatcher::new(source, file_path);
    for segment in scan(source) {
        match segment {
            Segment::Literal(text) => dispatcher.literal(text),
            Segment::Tag(tag) => dispatcher.tag(&tag)?,
        }
    }
    dispatcher.finish()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN PARSING FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse template text into IR for the configured target.
pub fn parse_template(
    source: &str,
    file_path: &str,
    options: &CompileOptions,
) -> Result<TemplateIR, CompilerError> {
    let nodes = match options.target {
        Target::Flat => dispatch(source, file_path)?,
        Target::Structural => parse_markup(source, file_path)?,
    };
    Ok(TemplateIR {
        file_path: file_path.to_string(),
        target: options.target,
        nodes,
    })
}
