//! Native renderer
//!
//! Evaluates template IR directly against a JSON context with the same
//! semantics the generated module has under a JavaScript engine: permissive
//! path lookup, `''+value` string conversion, truthiness, merge-built block
//! scopes. JSON has no callables, so the invoke-a-function branches of
//! `safeAccess` and `toArray` never apply here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::config::{CompileOptions, InvertedPolicy, Target};
use crate::finalize::Template;
use crate::validate::{AttributeValue, ElementNode, InterpolationNode, SectionNode, TemplateNode};

/// One entry of a structural render result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RenderedNode {
    Text(String),
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        children: Vec<RenderedNode>,
    },
}

impl RenderedNode {
    pub fn text(value: impl Into<String>) -> Self {
        RenderedNode::Text(value.into())
    }
}

/// Looks up the template a partial tag names.
pub trait PartialResolver {
    fn resolve(&self, name: &str) -> Option<&Template>;
}

/// Resolver for templates without partials.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPartials;

impl PartialResolver for NoPartials {
    fn resolve(&self, _name: &str) -> Option<&Template> {
        None
    }
}

impl PartialResolver for HashMap<String, Template> {
    fn resolve(&self, name: &str) -> Option<&Template> {
        self.get(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE SEMANTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// JavaScript truthiness. `None` stands for `undefined`.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn number_to_string(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => "0".to_string(),
        Some(f) if f.abs() >= 1e21 || f.abs() < 1e-6 => exponent_form(f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// `1e+21`, `1.5e-7`: JavaScript writes an explicit sign on the exponent.
fn exponent_form(f: f64) -> String {
    let formatted = format!("{:e}", f);
    match formatted.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
        _ => formatted,
    }
}

/// The string `''+value` produces.
pub fn to_js_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => number_to_string(n),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_js_string(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_string(),
    }
}

fn utf16_units(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// `value[key]`, with array and string `length` and index access.
pub fn get_property(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(items) => {
            if key == "length" {
                Some(Value::from(items.len()))
            } else {
                key.parse::<usize>().ok().and_then(|i| items.get(i).cloned())
            }
        }
        Value::String(s) => {
            let units = utf16_units(s);
            if key == "length" {
                Some(Value::from(units.len()))
            } else {
                key.parse::<usize>().ok().and_then(|i| {
                    units
                        .get(i)
                        .map(|u| Value::String(String::from_utf16_lossy(&[*u])))
                })
            }
        }
        _ => None,
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
        .replace('>', "&gt;")
}

/// Resolve `expr` against `scope` the way the embedded `safeAccess` helper does.
pub fn safe_access(scope: &Value, expr: &str, escape: bool) -> Option<Value> {
    if expr.is_empty() {
        return Some(scope.clone());
    }
    if expr.starts_with('.') {
        return get_property(scope, expr);
    }

    let path = expr.split(' ').next().unwrap_or_default();
    let mut current = Some(scope.clone());
    for key in path.split('.') {
        let next = match &current {
            Some(Value::Null) | None => break,
            Some(value) => get_property(value, key),
        };
        current = next;
    }

    match current {
        Some(Value::String(s)) if escape => Some(Value::String(escape_html(&s))),
        Some(Value::Number(n)) => Some(Value::Number(n)),
        other if truthy(other.as_ref()) => other,
        _ => Some(Value::String(String::new())),
    }
}

/// The sequence a section iterates, as the embedded `toArray` helper builds it.
pub fn to_array(scope: &Value, expr: &str) -> Vec<Value> {
    let value = safe_access(scope, expr, false);
    if !truthy(value.as_ref()) {
        return Vec::new();
    }
    match value {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// Copy the enumerable own properties of `source` onto `target`.
pub fn merge_into(target: &mut Map<String, Value>, source: &Value) {
    match source {
        Value::Object(map) => {
            for (key, value) in map {
                target.insert(key.clone(), value.clone());
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                target.insert(i.to_string(), item.clone());
            }
        }
        Value::String(s) => {
            for (i, unit) in utf16_units(s).iter().enumerate() {
                target.insert(i.to_string(), Value::String(String::from_utf16_lossy(&[*unit])));
            }
        }
        _ => {}
    }
}

fn length_is_positive(value: &Value) -> bool {
    match get_property(value, "length") {
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f > 0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_or(false, |f| f > 0.0),
        Some(Value::Bool(b)) => b,
        _ => false,
    }
}

/// Whether an inverted section governed by `value` is hidden.
pub fn inverted_hides(value: Option<&Value>, policy: InvertedPolicy) -> bool {
    let Some(v) = value.filter(|v| truthy(Some(*v))) else {
        return false;
    };
    let is_bool = v.is_boolean();
    match policy {
        InvertedPolicy::ArrayAware => is_bool || length_is_positive(v) || !v.is_array(),
        InvertedPolicy::LengthOnly => is_bool || length_is_positive(v),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════════

struct Renderer<'a> {
    partials: &'a dyn PartialResolver,
    options: &'a CompileOptions,
}

impl<'a> Renderer<'a> {
    fn interpolate(&self, node: &InterpolationNode, scope: &Value) -> String {
        to_js_string(safe_access(scope, &node.expression, node.escape).as_ref())
    }

    fn section_scopes(&self, section: &SectionNode, scope: &Value) -> Vec<Value> {
        let items = to_array(scope, &section.expression);
        let length = items.len();
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let mut bindings = Map::new();
                bindings.insert(".".to_string(), item.clone());
                bindings.insert(".index".to_string(), Value::from(index));
                bindings.insert(".length".to_string(), Value::from(length));

                let mut child = Map::new();
                merge_into(&mut child, scope);
                merge_into(&mut child, &Value::Object(bindings));
                merge_into(&mut child, &item);
                Value::Object(child)
            })
            .collect()
    }

    fn inverted_scope(&self, section: &SectionNode, scope: &Value) -> Option<Value> {
        let value = safe_access(scope, &section.expression, false);
        if inverted_hides(value.as_ref(), self.options.inverted_policy) {
            return None;
        }
        let mut child = Map::new();
        merge_into(&mut child, scope);
        Some(Value::Object(child))
    }

    fn partial(&self, name: &str) -> Option<&'a Template> {
        let partial = self.partials.resolve(name);
        if partial.is_none() {
            warn!(partial = name, "unresolved partial rendered as empty");
        }
        partial
    }

    fn text(&self, nodes: &[TemplateNode], scope: &Value, out: &mut String) {
        for node in nodes {
            match node {
                TemplateNode::Text(t) => out.push_str(&t.value),
                TemplateNode::Interpolation(i) => out.push_str(&self.interpolate(i, scope)),
                TemplateNode::Section(s) => {
                    for child in self.section_scopes(s, scope) {
                        self.text(&s.body, &child, out);
                    }
                }
                TemplateNode::InvertedSection(s) => {
                    if let Some(child) = self.inverted_scope(s, scope) {
                        self.text(&s.body, &child, out);
                    }
                }
                TemplateNode::Partial(p) => {
                    if let Some(template) = self.partial(&p.name) {
                        out.push_str(&template.render(scope, self.partials));
                    }
                }
                TemplateNode::Element(_) => out.push_str("[object Object]"),
            }
        }
    }

    fn literal(&self, value: &str, out: &mut Vec<RenderedNode>) {
        let collapsed = collapse_whitespace(value);
        if !collapsed.is_empty() {
            out.push(RenderedNode::Text(collapsed));
        }
    }

    fn nodes(&self, nodes: &[TemplateNode], scope: &Value, out: &mut Vec<RenderedNode>) {
        for node in nodes {
            match node {
                TemplateNode::Text(t) => self.literal(&t.value, out),
                TemplateNode::Interpolation(i) => {
                    out.push(RenderedNode::Text(self.interpolate(i, scope)))
                }
                TemplateNode::Section(s) => {
                    for child in self.section_scopes(s, scope) {
                        self.nodes(&s.body, &child, out);
                    }
                }
                TemplateNode::InvertedSection(s) => {
                    if let Some(child) = self.inverted_scope(s, scope) {
                        self.nodes(&s.body, &child, out);
                    }
                }
                TemplateNode::Partial(p) => {
                    if let Some(template) = self.partial(&p.name) {
                        match template.options().target {
                            Target::Flat => {
                                out.push(RenderedNode::Text(template.render(scope, self.partials)))
                            }
                            Target::Structural => {
                                out.extend(template.render_nodes(scope, self.partials))
                            }
                        }
                    }
                }
                TemplateNode::Element(el) => out.push(self.element(el, scope)),
            }
        }
    }

    fn element(&self, el: &ElementNode, scope: &Value) -> RenderedNode {
        let attrs = el
            .attributes
            .iter()
            .map(|attr| {
                let value = match &attr.value {
                    AttributeValue::Static(s) => s.clone(),
                    AttributeValue::Dynamic(parts) => {
                        let mut value = String::new();
                        self.attribute_text(parts, scope, &mut value);
                        value
                    }
                };
                (attr.name.clone(), value)
            })
            .collect();
        let mut children = Vec::new();
        self.nodes(&el.children, scope, &mut children);
        RenderedNode::Element {
            tag: el.tag.clone(),
            attrs,
            children,
        }
    }

    /// Attribute values concatenate; literal parts still follow the structural
    /// whitespace policy.
    fn attribute_text(&self, parts: &[TemplateNode], scope: &Value, out: &mut String) {
        for part in parts {
            match part {
                TemplateNode::Text(t) => out.push_str(&collapse_whitespace(&t.value)),
                TemplateNode::Section(s) => {
                    for child in self.section_scopes(s, scope) {
                        self.attribute_text(&s.body, &child, out);
                    }
                }
                TemplateNode::InvertedSection(s) => {
                    if let Some(child) = self.inverted_scope(s, scope) {
                        self.attribute_text(&s.body, &child, out);
                    }
                }
                other => self.text(std::slice::from_ref(other), scope, out),
            }
        }
    }
}

/// Drop every newline together with the whitespace run that follows it.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' && chars.peek() == Some(&'\n') {
            continue;
        }
        if c == '\n' {
            while chars.peek().map_or(false, |next| next.is_whitespace()) {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Render `nodes` to the string a flat module returns.
pub fn render_to_string(
    nodes: &[TemplateNode],
    data: &Value,
    partials: &dyn PartialResolver,
    options: &CompileOptions,
) -> String {
    let renderer = Renderer { partials, options };
    let mut out = String::new();
    renderer.text(nodes, data, &mut out);
    out
}

/// Render `nodes` to the list a structural module returns.
pub fn render_nodes(
    nodes: &[TemplateNode],
    data: &Value,
    partials: &dyn PartialResolver,
    options: &CompileOptions,
) -> Vec<RenderedNode> {
    let renderer = Renderer { partials, options };
    let mut out = Vec::new();
    renderer.nodes(nodes, data, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, data: Value) -> String {
        Template::parse(source, &CompileOptions::default())
            .unwrap()
            .render(&data, &NoPartials)
    }

    #[test]
    fn test_js_string_conversion() {
        assert_eq!(to_js_string(None), "undefined");
        assert_eq!(to_js_string(Some(&json!(null))), "null");
        assert_eq!(to_js_string(Some(&json!(3.0))), "3");
        assert_eq!(to_js_string(Some(&json!(1.5))), "1.5");
        assert_eq!(to_js_string(Some(&json!(1e21))), "1e+21");
        assert_eq!(to_js_string(Some(&json!(-2.5e30))), "-2.5e+30");
        assert_eq!(to_js_string(Some(&json!(1.5e-7))), "1.5e-7");
        assert_eq!(to_js_string(Some(&json!(1e20))), "100000000000000000000");
        assert_eq!(to_js_string(Some(&json!(0.000001))), "0.000001");
        assert_eq!(to_js_string(Some(&json!([1, null, "a"]))), "1,,a");
        assert_eq!(to_js_string(Some(&json!({"a": 1}))), "[object Object]");
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(truthy(Some(&json!([]))));
        assert!(truthy(Some(&json!({}))));
        assert!(truthy(Some(&json!("0"))));
    }

    #[test]
    fn test_safe_access_paths() {
        let data = json!({"user": {"name": "Ann", "tags": ["a", "b"]}, "gone": null, "zero": 0});
        assert_eq!(safe_access(&data, "user.name", false), Some(json!("Ann")));
        assert_eq!(safe_access(&data, "user.tags.length", false), Some(json!(2)));
        assert_eq!(safe_access(&data, "user.tags.1", false), Some(json!("b")));
        assert_eq!(safe_access(&data, "gone.deeper.still", false), Some(json!("")));
        assert_eq!(safe_access(&data, "missing.x", false), Some(json!("")));
        assert_eq!(safe_access(&data, "zero", false), Some(json!(0)));
        assert_eq!(safe_access(&data, "user.name extra args", false), Some(json!("Ann")));
    }

    #[test]
    fn test_dot_prefixed_lookup_is_direct() {
        let scope = json!({".": "<i>", ".index": 0});
        assert_eq!(safe_access(&scope, ".", true), Some(json!("<i>")));
        assert_eq!(safe_access(&scope, ".index", false), Some(json!(0)));
        assert_eq!(safe_access(&scope, ".length", false), None);
    }

    #[test]
    fn test_escaping() {
        assert_eq!(
            render("Hello {{name}}!", json!({"name": "<b>Bob</b>"})),
            "Hello &lt;b&gt;Bob&lt;/b&gt;!"
        );
        assert_eq!(render("{{q}}", json!({"q": "a & \"b\""})), "a &amp; &quot;b&quot;");
    }

    #[test]
    fn test_raw_interpolation() {
        assert_eq!(render("{{{name}}}", json!({"name": "<b>x</b>"})), "<b>x</b>");
    }

    #[test]
    fn test_iteration() {
        assert_eq!(render("{{#items}}{{.}},{{/items}}", json!({"items": [1, 2, 3]})), "1,2,3,");
        assert_eq!(render("{{#items}}{{.}},{{/items}}", json!({"items": []})), "");
    }

    #[test]
    fn test_iteration_bindings_and_shadowing() {
        let out = render(
            "{{#rows}}{{.index}}/{{.length}}:{{name}}{{title}};{{/rows}}",
            json!({"title": "T", "rows": [{"name": "a"}, {"name": "b", "title": "own"}]}),
        );
        assert_eq!(out, "0/2:aT;1/2:bown;");
    }

    #[test]
    fn test_scalar_section_runs_once() {
        assert_eq!(render("{{#flag}}[{{.}}]{{/flag}}", json!({"flag": "yes"})), "[yes]");
        assert_eq!(render("{{#n}}x{{/n}}", json!({"n": 0})), "");
    }

    #[test]
    fn test_inverted_sections() {
        let tpl = "{{^items}}empty{{/items}}";
        assert_eq!(render(tpl, json!({"items": []})), "empty");
        assert_eq!(render(tpl, json!({"items": [1]})), "");
        assert_eq!(render("{{^flag}}off{{/flag}}", json!({"flag": false})), "off");
        assert_eq!(render("{{^flag}}off{{/flag}}", json!({"flag": true})), "");
        assert_eq!(render("{{^flag}}off{{/flag}}", json!({})), "off");
    }

    #[test]
    fn test_inverted_policy_differs_on_plain_objects() {
        let object = json!({"a": 1});
        assert!(inverted_hides(Some(&object), InvertedPolicy::ArrayAware));
        assert!(!inverted_hides(Some(&object), InvertedPolicy::LengthOnly));
        assert!(!inverted_hides(Some(&json!([])), InvertedPolicy::ArrayAware));
        assert!(inverted_hides(Some(&json!("x")), InvertedPolicy::LengthOnly));

        let options = CompileOptions {
            inverted_policy: InvertedPolicy::LengthOnly,
            ..CompileOptions::default()
        };
        let template = Template::parse("{{^obj}}shown{{/obj}}", &options).unwrap();
        assert_eq!(template.render(&json!({"obj": {"a": 1}}), &NoPartials), "shown");
    }

    #[test]
    fn test_inverted_scope_has_no_element_bindings() {
        let out = render("{{#xs}}{{^none}}{{.index}}{{/none}}{{/xs}}", json!({"xs": ["a"]}));
        assert_eq!(out, "0");
        assert_eq!(render("{{^none}}{{.index}}{{/none}}", json!({})), "undefined");
    }

    #[test]
    fn test_render_does_not_mutate_data() {
        let data = json!({"items": [{"a": 1}]});
        let before = data.clone();
        render("{{#items}}{{a}}{{/items}}", data.clone());
        assert_eq!(data, before);
    }

    #[test]
    fn test_partials() {
        let options = CompileOptions::default();
        let mut partials = HashMap::new();
        partials.insert("row".to_string(), Template::parse("<{{.}}>", &options).unwrap());

        let template = Template::parse("{{#xs}}{{> row}}{{/xs}}{{>missing}}", &options).unwrap();
        assert_eq!(template.render(&json!({"xs": [1, 2]}), &partials), "<1><2>");
    }

    #[test]
    fn test_structural_nodes() {
        let template = Template::parse(
            "<ul class=\"list {{kind}}\">\n  {{#items}}<li>{{.}}</li>{{/items}}\n</ul>",
            &CompileOptions::structural(),
        )
        .unwrap();
        let data = json!({"kind": "wide", "items": ["a", "b"]});
        let nodes = template.render_nodes(&data, &NoPartials);

        let li = |text: &str| RenderedNode::Element {
            tag: "li".to_string(),
            attrs: BTreeMap::new(),
            children: vec![RenderedNode::text(text)],
        };
        let mut attrs = BTreeMap::new();
        attrs.insert("class".to_string(), "list wide".to_string());
        assert_eq!(
            nodes,
            vec![RenderedNode::Element {
                tag: "ul".to_string(),
                attrs,
                children: vec![li("a"), li("b")],
            }]
        );
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("a\n   b\r\n\tc"), "abc");
        assert_eq!(collapse_whitespace("  lead"), "  lead");
    }
}
