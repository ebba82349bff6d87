//! Markup Module
//!
//! Front end for the structural target. Template tags are first swapped for
//! placeholders so the HTML5 parser sees plain text, then the element tree is
//! walked: text nodes and attribute values are split back into literal spans
//! and tags and fed through a [`Dispatcher`]. Every element dispatches its
//! children separately, so a block must open and close inside one parent.
//! Text the parser would foster-parent out of a table is rejected rather than
//! compiled in its moved position.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use html5ever::Attribute;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::{Captures, Regex};
use std::collections::HashMap;

use crate::parse::Dispatcher;
use crate::scanner::{line_at, scan, Segment, Tag};
use crate::validate::{
    AttributeIR, AttributeValue, CompilerError, ElementNode, TemplateNode, ERR_MARKUP_PARSE,
};

// ═══════════════════════════════════════════════════════════════════════════════
// SVG ATTRIBUTE CASE MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// The HTML parser lowercases attribute names; SVG needs these back in camelCase.
    static ref SVG_ATTR_CASE_MAP: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("viewbox", "viewBox");
        m.insert("preserveaspectratio", "preserveAspectRatio");
        m.insert("gradienttransform", "gradientTransform");
        m.insert("gradientunits", "gradientUnits");
        m.insert("patternunits", "patternUnits");
        m.insert("patterntransform", "patternTransform");
        m.insert("markerwidth", "markerWidth");
        m.insert("markerheight", "markerHeight");
        m.insert("refx", "refX");
        m.insert("refy", "refY");
        m.insert("stddeviation", "stdDeviation");
        m.insert("textlength", "textLength");
        m.insert("clippathunits", "clipPathUnits");
        m
    };

    static ref SVG_TAGS: std::collections::HashSet<&'static str> = {
        let mut s = std::collections::HashSet::new();
        for tag in [
            "svg", "path", "circle", "ellipse", "line", "polyline", "polygon", "rect", "g",
            "defs", "use", "symbol", "clippath", "mask", "pattern", "marker",
            "lineargradient", "radialgradient", "stop", "filter", "fegaussianblur", "text",
            "tspan", "textpath", "image",
        ] {
            s.insert(tag);
        }
        s
    };
}

/// Reported by the tree builder when non-whitespace text sits directly in a
/// table and gets moved in front of it.
const FOSTER_PARENTED_TEXT: &str = "Non-space table text";

fn correct_svg_attribute_name(attr_name: &str, tag_name: &str) -> String {
    let lower_tag = tag_name.to_lowercase();
    if SVG_TAGS.contains(lower_tag.as_str()) {
        if let Some(&corrected) = SVG_ATTR_CASE_MAP.get(attr_name.to_lowercase().as_str()) {
            return corrected.to_string();
        }
    }
    attr_name.to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TAG NORMALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Placeholder spelling for one parse: `<prefix>N__`, with a prefix that never
/// occurs in the template text so author content cannot be taken for a tag.
struct Placeholder {
    prefix: String,
    pattern: Regex,
}

impl Placeholder {
    fn for_source(source: &str, file_path: &str) -> Result<Self, CompilerError> {
        let mut prefix = "__stache_tag_".to_string();
        let mut salt = 0u32;
        while source.contains(&prefix) {
            salt += 1;
            prefix = format!("__stache{}_tag_", salt);
        }
        let pattern = Regex::new(&format!(r"{}(\d+)__", regex::escape(&prefix))).map_err(|e| {
            CompilerError::new(
                ERR_MARKUP_PARSE,
                &format!("Invalid placeholder pattern: {}", e),
                file_path,
                0,
                0,
            )
        })?;
        Ok(Placeholder { prefix, pattern })
    }

    fn spell(&self, index: usize) -> String {
        format!("{}{}__", self.prefix, index)
    }
}

/// Replace every template tag with a placeholder, returning the rewritten
/// text and the tags in placeholder order.
fn normalize_tags<'s>(source: &'s str, placeholder: &Placeholder) -> (String, Vec<Tag<'s>>) {
    let mut normalized = String::with_capacity(source.len());
    let mut tags = Vec::new();
    for segment in scan(source) {
        match segment {
            Segment::Literal(text) => normalized.push_str(text),
            Segment::Tag(tag) => {
                normalized.push_str(&placeholder.spell(tags.len()));
                tags.push(tag);
            }
        }
    }
    (normalized, tags)
}

fn is_document_wrapper(tag: &str) -> bool {
    tag == "html" || tag == "head" || tag == "body"
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE WALK
// ═══════════════════════════════════════════════════════════════════════════════

struct MarkupWalker<'s> {
    source: &'s str,
    file_path: &'s str,
    tags: Vec<Tag<'s>>,
    placeholder: Placeholder,
    /// The source spelled out `<html>`; otherwise the parser's implied
    /// html/head/body wrappers are flattened away.
    keep_document_tags: bool,
}

impl<'s> MarkupWalker<'s> {
    fn tag_for(&self, caps: &Captures<'_>) -> Option<&Tag<'s>> {
        caps[1].parse::<usize>().ok().and_then(|i| self.tags.get(i))
    }

    /// Feed text that may contain placeholders into `dispatcher`.
    fn feed(&self, text: &str, dispatcher: &mut Dispatcher<'s>) -> Result<(), CompilerError> {
        let mut last_end = 0;
        for caps in self.placeholder.pattern.captures_iter(text) {
            let Some(m) = caps.get(0) else { continue };
            let Some(tag) = self.tag_for(&caps) else {
                continue;
            };
            dispatcher.literal(&text[last_end..m.start()]);
            dispatcher.tag(tag)?;
            last_end = m.end();
        }
        dispatcher.literal(&text[last_end..]);
        Ok(())
    }

    /// Put the original tag text back in place of each placeholder.
    fn restore(&self, text: &str) -> String {
        self.placeholder
            .pattern
            .replace_all(text, |caps: &Captures<'_>| match self.tag_for(caps) {
                Some(tag) => self.source[tag.start..tag.end].to_string(),
                None => caps[0].to_string(),
            })
            .to_string()
    }

    fn attributes(
        &self,
        tag_name: &str,
        attrs: &[Attribute],
    ) -> Result<Vec<AttributeIR>, CompilerError> {
        let mut parsed = Vec::with_capacity(attrs.len());
        for attr in attrs {
            let name = self.restore(&correct_svg_attribute_name(&attr.name.local, tag_name));
            let raw_value = attr.value.to_string();

            let value = if self.placeholder.pattern.is_match(&raw_value) {
                let mut dispatcher = Dispatcher::new(self.source, self.file_path);
                self.feed(&raw_value, &mut dispatcher)?;
                AttributeValue::Dynamic(dispatcher.finish()?)
            } else {
                AttributeValue::Static(raw_value)
            };
            parsed.push(AttributeIR { name, value });
        }
        Ok(parsed)
    }

    fn walk_children(
        &self,
        handle: &Handle,
        dispatcher: &mut Dispatcher<'s>,
    ) -> Result<(), CompilerError> {
        for child in handle.children.borrow().iter() {
            self.walk(child, dispatcher)?;
        }
        Ok(())
    }

    fn walk(&self, handle: &Handle, dispatcher: &mut Dispatcher<'s>) -> Result<(), CompilerError> {
        match &handle.data {
            NodeData::Document => self.walk_children(handle, dispatcher),
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                self.feed(&text, dispatcher)
            }
            NodeData::Element { name, attrs, .. } => {
                let tag = name.local.to_string();
                if is_document_wrapper(&tag) && !self.keep_document_tags {
                    return self.walk_children(handle, dispatcher);
                }

                let attributes = self.attributes(&tag, &attrs.borrow())?;
                let mut inner = Dispatcher::new(self.source, self.file_path);
                self.walk_children(handle, &mut inner)?;
                let children = inner.finish()?;

                dispatcher.node(TemplateNode::Element(ElementNode {
                    tag,
                    attributes,
                    children,
                }));
                Ok(())
            }
            NodeData::Doctype { .. }
            | NodeData::Comment { .. }
            | NodeData::ProcessingInstruction { .. } => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

fn foster_parent_error(source: &str, file_path: &str) -> CompilerError {
    let line = source
        .to_lowercase()
        .find("<table")
        .map_or(0, |offset| line_at(source, offset));
    CompilerError::with_details(
        ERR_MARKUP_PARSE,
        "Text placed directly inside a table would be moved out of the table",
        file_path,
        line,
        0,
        None,
        vec![
            "Wrap the block in a <tbody> and let it repeat whole <tr> rows".to_string(),
            "Or keep the text inside a <td>, <th> or <caption>".to_string(),
        ],
    )
}

/// Parse a template as host markup into element-aware IR.
pub fn parse_markup(source: &str, file_path: &str) -> Result<Vec<TemplateNode>, CompilerError> {
    let placeholder = Placeholder::for_source(source, file_path)?;
    let (normalized, tags) = normalize_tags(source, &placeholder);

    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut normalized.as_bytes())
        .map_err(|e| {
            CompilerError::new(
                ERR_MARKUP_PARSE,
                &format!("Failed to parse markup: {}", e),
                file_path,
                0,
                0,
            )
        })?;

    if dom.errors.iter().any(|e| e.as_ref() == FOSTER_PARENTED_TEXT) {
        return Err(foster_parent_error(source, file_path));
    }

    let walker = MarkupWalker {
        source,
        file_path,
        tags,
        placeholder,
        keep_document_tags: source.to_lowercase().contains("<html"),
    };

    let mut dispatcher = Dispatcher::new(source, file_path);
    walker.walk(&dom.document, &mut dispatcher)?;
    dispatcher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{ERR_MISSING_BLOCK_END, ERR_UNEXPECTED_BLOCK_CLOSE};

    fn element(node: &TemplateNode) -> &ElementNode {
        match node {
            TemplateNode::Element(el) => el,
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_tags() {
        let source = "<p class=\"{{cls}}\">{{name}}</p>";
        let placeholder = Placeholder::for_source(source, "t").unwrap();
        let (normalized, tags) = normalize_tags(source, &placeholder);
        assert_eq!(
            normalized,
            "<p class=\"__stache_tag_0__\">__stache_tag_1__</p>"
        );
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].key, "name");
    }

    #[test]
    fn test_svg_attribute_correction() {
        assert_eq!(correct_svg_attribute_name("viewbox", "svg"), "viewBox");
        assert_eq!(correct_svg_attribute_name("class", "svg"), "class");
        assert_eq!(correct_svg_attribute_name("viewbox", "div"), "viewbox");
    }

    #[test]
    fn test_elements_and_attributes() {
        let nodes = parse_markup(r#"<a href="/u/{{id}}" title="static">{{name}}</a>"#, "t")
            .unwrap();
        assert_eq!(nodes.len(), 1);
        let a = element(&nodes[0]);
        assert_eq!(a.tag, "a");
        assert_eq!(a.attributes.len(), 2);

        let href = a.attributes.iter().find(|at| at.name == "href").unwrap();
        match &href.value {
            AttributeValue::Dynamic(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(
                    &parts[1],
                    TemplateNode::Interpolation(i) if i.expression == "id"
                ));
            }
            other => panic!("expected dynamic value, got {:?}", other),
        }
        let title = a.attributes.iter().find(|at| at.name == "title").unwrap();
        assert_eq!(title.value, AttributeValue::Static("static".to_string()));

        assert!(matches!(
            &a.children[0],
            TemplateNode::Interpolation(i) if i.expression == "name"
        ));
    }

    #[test]
    fn test_sections_between_sibling_elements() {
        let nodes = parse_markup("<ul>{{#items}}<li>{{.}}</li>{{/items}}</ul>", "t").unwrap();
        let ul = element(&nodes[0]);
        assert_eq!(ul.children.len(), 1);
        let TemplateNode::Section(section) = &ul.children[0] else {
            panic!("expected section");
        };
        assert_eq!(section.expression, "items");
        assert_eq!(element(&section.body[0]).tag, "li");
    }

    #[test]
    fn test_implied_wrappers_are_flattened() {
        let nodes = parse_markup("<p>a</p><p>b</p>", "t").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(element(&nodes[0]).tag, "p");
    }

    #[test]
    fn test_explicit_document_is_kept() {
        let nodes = parse_markup("<html><body><p>x</p></body></html>", "t").unwrap();
        assert_eq!(element(&nodes[0]).tag, "html");
    }

    #[test]
    fn test_block_crossing_an_element_fails() {
        let err = parse_markup("<div>{{#a}}</div>{{/a}}", "t").unwrap_err();
        assert_eq!(err.code, ERR_MISSING_BLOCK_END);

        let err = parse_markup("{{#a}}<div>{{/a}}</div>", "t").unwrap_err();
        assert_eq!(err.code, ERR_UNEXPECTED_BLOCK_CLOSE);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_comments_are_dropped() {
        let nodes = parse_markup("<p><!-- note -->{{! hidden }}x</p>", "t").unwrap();
        let p = element(&nodes[0]);
        assert_eq!(p.children.len(), 1);
    }

    #[test]
    fn test_placeholder_avoids_author_text() {
        let placeholder = Placeholder::for_source("see __stache_tag_0__", "t").unwrap();
        assert_eq!(placeholder.spell(0), "__stache1_tag_0__");

        let nodes = parse_markup("<p>__stache_tag_0__ {{#a}}<b>x</b>{{/a}}</p>", "t").unwrap();
        let p = element(&nodes[0]);
        assert_eq!(p.children.len(), 2);
        assert!(matches!(
            &p.children[0],
            TemplateNode::Text(t) if t.value == "__stache_tag_0__ "
        ));
        let TemplateNode::Section(section) = &p.children[1] else {
            panic!("expected section, got {:?}", p.children);
        };
        assert_eq!(element(&section.body[0]).tag, "b");
    }

    #[test]
    fn test_text_directly_in_table_is_rejected() {
        let err = parse_markup(
            "<div>\n<table>{{#rows}}<tr><td>{{.}}</td></tr>{{/rows}}</table>\n</div>",
            "rows.mustache",
        )
        .unwrap_err();
        assert_eq!(err.code, ERR_MARKUP_PARSE);
        assert_eq!(err.line, 2);
        assert_eq!(err.file, "rows.mustache");
        assert!(!err.hints.is_empty());

        let nodes = parse_markup("<table><tr><td>{{#rows}}{{.}}{{/rows}}</td></tr></table>", "t")
            .unwrap();
        assert_eq!(element(&nodes[0]).tag, "table");
    }
}
