//! Codegen module
//!
//! Walks template IR and emits the body of the render routine as an ordered
//! run of JavaScript fragments. Each fragment is followed by its separator; the
//! enclosing construct supplies the terminator (`''` or `[]`) that closes the run.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::config::{CompileOptions, InvertedPolicy, Target};
use crate::helpers::HelperUsage;
use crate::scope::{ScopeKind, ScopeStack};
use crate::validate::{
    AttributeValue, ElementNode, InterpolationNode, SectionNode, SourceLocation, TemplateIR,
    TemplateNode,
};

lazy_static! {
    static ref NEWLINE_RUN_RE: Regex = Regex::new(r"\r?\n\s*").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT MODES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Fragments are collected into a list: `a, b, `.
    List,
    /// Fragments are appended into one string expression: `a + b + `.
    Concat,
}

impl JoinMode {
    fn separator(self) -> &'static str {
        match self {
            JoinMode::List => ", ",
            JoinMode::Concat => " + ",
        }
    }
}

/// What a run of fragments evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    /// Strings, joined into one string by whoever consumes the run.
    Text(JoinMode),
    /// A list of text strings and element objects.
    Nodes,
}

impl Output {
    fn separator(self) -> &'static str {
        match self {
            Output::Text(mode) => mode.separator(),
            Output::Nodes => JoinMode::List.separator(),
        }
    }

    fn terminator(self) -> &'static str {
        match self {
            Output::Text(_) => "''",
            Output::Nodes => "[]",
        }
    }

    /// Block results are joined back into a string only for text runs.
    fn block_join(self) -> &'static str {
        match self {
            Output::Text(_) => ".join(\"\")",
            Output::Nodes => "",
        }
    }
}

/// A body ready for assembly, plus the features it exercised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedBody {
    pub code: String,
    pub usage: HelperUsage,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EMITTER
// ═══════════════════════════════════════════════════════════════════════════════

struct Emitter<'o> {
    options: &'o CompileOptions,
    target: Target,
    scopes: ScopeStack,
    usage: HelperUsage,
}

impl<'o> Emitter<'o> {
    fn emit_nodes(&mut self, nodes: &[TemplateNode], output: Output) -> String {
        let mut code = String::new();
        for node in nodes {
            if let Some(fragment) = self.emit_node(node, output) {
                code.push_str(&fragment);
                code.push_str(output.separator());
            }
        }
        code
    }

    fn emit_node(&mut self, node: &TemplateNode, output: Output) -> Option<String> {
        match node {
            TemplateNode::Text(t) => self.emit_literal(&t.value),
            TemplateNode::Interpolation(i) => Some(self.emit_interpolation(i)),
            TemplateNode::Partial(p) => Some(format!(
                "require('./{}').render({})",
                escape_js_string(&format!("{}{}", p.name, self.options.partial_extension)),
                self.scopes.current_var()
            )),
            TemplateNode::Section(s) => Some(self.emit_section(s, output)),
            TemplateNode::InvertedSection(s) => Some(self.emit_inverted(s, output)),
            TemplateNode::Element(el) => Some(self.emit_element(el)),
        }
    }

    fn emit_literal(&self, text: &str) -> Option<String> {
        match self.target {
            Target::Flat => Some(format!("'{}'", escape_js_string(text))),
            Target::Structural => {
                let collapsed = NEWLINE_RUN_RE.replace_all(text, "");
                if collapsed.is_empty() {
                    None
                } else {
                    Some(format!("'{}'", escape_js_string(&collapsed)))
                }
            }
        }
    }

    fn emit_interpolation(&self, node: &InterpolationNode) -> String {
        let escape = if node.escape { ", true" } else { "" };
        format!(
            "''+safeAccess({}, '{}'{})",
            self.scopes.current_var(),
            escape_js_string(&node.expression),
            escape
        )
    }

    /// Emit `body` inside a freshly pushed scope, returning
    /// `(parent_var, child_var, body_code)`.
    fn in_scope(
        &mut self,
        kind: ScopeKind,
        expression: &str,
        location: SourceLocation,
        body: &[TemplateNode],
        output: Output,
    ) -> (String, String, String) {
        self.usage.uses_block = true;
        let parent = self.scopes.current_var();
        let child = self.scopes.push(kind, expression, location).context_var();
        debug!(expression, depth = self.scopes.depth(), "emit block");
        let code = self.emit_nodes(body, output);
        self.scopes.pop();
        (parent, child, code)
    }

    fn emit_section(&mut self, node: &SectionNode, output: Output) -> String {
        let (parent, child, body) = self.in_scope(
            ScopeKind::Section,
            &node.expression,
            node.location,
            &node.body,
            output,
        );
        format!(
            "(spread(toArray({parent}, '{expr}').map(function (e, i, a) {{\n\
             \tvar {child} = merge({{}}, {parent}, \
             {{'.': e, '.index': i, '.length': a.length}}, e);\n\
             \treturn [].concat({body}{term});\n\
             }})){join})",
            parent = parent,
            expr = escape_js_string(&node.expression),
            child = child,
            body = body,
            term = output.terminator(),
            join = output.block_join(),
        )
    }

    fn emit_inverted(&mut self, node: &SectionNode, output: Output) -> String {
        let (parent, child, body) = self.in_scope(
            ScopeKind::Inverted,
            &node.expression,
            node.location,
            &node.body,
            output,
        );
        let hidden = match self.options.inverted_policy {
            InvertedPolicy::ArrayAware => concat!(
                "!!v && (typeof v === 'boolean' || v.length > 0 ",
                "|| Object.prototype.toString.call(v) !== '[object Array]')"
            ),
            InvertedPolicy::LengthOnly => "!!v && (typeof v === 'boolean' || v.length > 0)",
        };
        format!(
            "((function (v) {{ return {hidden}; }}(safeAccess({parent}, '{expr}'))) ? [] : \
             spread([1].map(function () {{\n\
             \tvar {child} = merge({{}}, {parent});\n\
             \treturn [].concat({body}{term});\n\
             }})){join})",
            hidden = hidden,
            parent = parent,
            expr = escape_js_string(&node.expression),
            child = child,
            body = body,
            term = output.terminator(),
            join = output.block_join(),
        )
    }

    fn emit_element(&mut self, el: &ElementNode) -> String {
        let attrs: Vec<String> = el
            .attributes
            .iter()
            .map(|attr| {
                let value = match &attr.value {
                    AttributeValue::Static(s) => format!("'{}'", escape_js_string(s)),
                    AttributeValue::Dynamic(parts) => {
                        let output = Output::Text(JoinMode::Concat);
                        format!("{}{}", self.emit_nodes(parts, output), output.terminator())
                    }
                };
                format!("'{}': {}", escape_js_string(&attr.name), value)
            })
            .collect();
        let children = self.emit_nodes(&el.children, Output::Nodes);
        format!(
            "{{tag: '{}', attrs: {{{}}}, children: [].concat({}{})}}",
            escape_js_string(&el.tag),
            attrs.join(", "),
            children,
            Output::Nodes.terminator()
        )
    }
}

/// Emit the render body for `ir`. The returned code is a run of fragments
/// awaiting the wrapper's terminator.
pub fn emit_body(ir: &TemplateIR, options: &CompileOptions) -> EmittedBody {
    let mut emitter = Emitter {
        options,
        target: ir.target,
        scopes: ScopeStack::new(),
        usage: HelperUsage::default(),
    };
    let output = match ir.target {
        Target::Flat => Output::Text(JoinMode::List),
        Target::Structural => Output::Nodes,
    };
    let code = emitter.emit_nodes(&ir.nodes, output);
    EmittedBody {
        code,
        usage: emitter.usage,
    }
}

/// Escape text for a single-quoted JavaScript string literal.
pub fn escape_js_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_template;

    fn body(source: &str, options: &CompileOptions) -> EmittedBody {
        let ir = parse_template(source, "t", options).unwrap();
        emit_body(&ir, options)
    }

    #[test]
    fn test_escape_js_string() {
        assert_eq!(escape_js_string("it's"), "it\\'s");
        assert_eq!(escape_js_string("line1\nline2"), "line1\\nline2");
        assert_eq!(escape_js_string("a\\b"), "a\\\\b");
        assert_eq!(escape_js_string("cr\r"), "cr\\r");
    }

    #[test]
    fn test_literal_and_interpolation_fragments() {
        let out = body("Hi {{name}}{{{raw}}}\n", &CompileOptions::default());
        assert_eq!(
            out.code,
            "'Hi ', ''+safeAccess(data, 'name', true), ''+safeAccess(data, 'raw'), '\\n', "
        );
        assert!(!out.usage.uses_block);
    }

    #[test]
    fn test_section_binds_next_depth() {
        let out = body("{{#a}}{{#b}}{{x}}{{/b}}{{/a}}", &CompileOptions::default());
        assert!(out.usage.uses_block);
        assert!(out.code.starts_with("(spread(toArray(data, 'a').map("));
        assert!(out.code.contains(
            "var data$1 = merge({}, data, {'.': e, '.index': i, '.length': a.length}, e);"
        ));
        assert!(out.code.contains("toArray(data$1, 'b')"));
        assert!(out.code.contains("var data$2 = merge({}, data$1,"));
        assert!(out.code.contains("safeAccess(data$2, 'x', true)"));
        assert!(out.code.contains("})).join(\"\"))"));
    }

    #[test]
    fn test_sibling_sections_reuse_depth() {
        let out = body("{{#a}}{{/a}}{{#b}}{{/b}}", &CompileOptions::default());
        assert_eq!(out.code.matches("var data$1 =").count(), 2);
        assert!(!out.code.contains("data$2"));
    }

    #[test]
    fn test_inverted_policies() {
        let aware = body("{{^list}}none{{/list}}", &CompileOptions::default());
        assert!(aware.usage.uses_block);
        assert!(aware.code.contains("'[object Array]'"));
        assert!(aware.code.contains("var data$1 = merge({}, data);"));

        let length_only = CompileOptions {
            inverted_policy: InvertedPolicy::LengthOnly,
            ..CompileOptions::default()
        };
        let out = body("{{^list}}none{{/list}}", &length_only);
        assert!(!out.code.contains("[object Array]"));
        assert!(out.code.contains("v.length > 0"));
    }

    #[test]
    fn test_partial_uses_current_scope() {
        let out = body("{{#items}}{{> row}}{{/items}}", &CompileOptions::default());
        assert!(out.code.contains("require('./row.js').render(data$1)"));

        let custom = CompileOptions {
            partial_extension: ".cjs".to_string(),
            ..CompileOptions::default()
        };
        let out = body("{{>row}}", &custom);
        assert_eq!(out.code, "require('./row.cjs').render(data), ");
    }

    #[test]
    fn test_expressions_are_escaped_in_literals() {
        let out = body("{{a'b}}", &CompileOptions::default());
        assert_eq!(out.code, "''+safeAccess(data, 'a\\'b', true), ");
    }

    #[test]
    fn test_structural_attributes_concatenate() {
        let out = body(
            "<a class=\"btn {{kind}}\">\n    Go\n</a>",
            &CompileOptions::structural(),
        );
        assert_eq!(
            out.code,
            concat!(
                "{tag: 'a', attrs: {'class': 'btn ' + ''+safeAccess(data, 'kind', true) + ''}, ",
                "children: [].concat('Go', [])}, "
            )
        );
    }

    #[test]
    fn test_structural_sections_stay_lists() {
        let out = body(
            "<ul>{{#items}}<li>{{.}}</li>{{/items}}</ul>",
            &CompileOptions::structural(),
        );
        assert!(out.code.contains("return [].concat({tag: 'li'"));
        assert!(!out.code.contains(".join(\"\")"));
    }
}
