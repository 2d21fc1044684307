//! The minimal document a preview renders into, and an overlay-aware serializer.

use ego_tree::iter::Edge;
use ego_tree::NodeId;
use scraper::{Html, Node};
use std::collections::HashMap;
use std::fmt::Write;

/// Baseline visual affordances: visible focus rings and minimum tap targets.
pub const BASELINE_STYLES: &str = "*{margin:0;padding:0;box-sizing:border-box;}\
body{font-family:system-ui,-apple-system,sans-serif;padding:16px;line-height:1.5;}\
button,[role=\"button\"]{cursor:pointer;padding:8px 16px;border:1px solid #ccc;border-radius:4px;background:#f0f0f0;min-height:44px;min-width:44px;}\
button:hover,[role=\"button\"]:hover{background:#e0e0e0;}\
a,input,select,textarea{min-height:44px;}\
:focus-visible,button:focus,[role=\"button\"]:focus{outline:2px solid #0066cc;outline-offset:2px;}\
input,textarea{padding:8px;border:1px solid #ccc;border-radius:4px;}\
label{display:block;margin-bottom:4px;font-weight:500;}\
img{max-width:100%;}";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone)]
pub struct ShellOptions<'a> {
    pub lang: &'a str,
    pub title: &'a str,
}

impl Default for ShellOptions<'_> {
    fn default() -> Self {
        Self {
            lang: "ko",
            title: "Preview",
        }
    }
}

/// Wraps normalized markup in a complete HTML document.
pub fn build_shell(body: &str, options: &ShellOptions<'_>) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"UTF-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
<title>{title}</title>\n<style>{styles}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        lang = escape_attribute(options.lang),
        title = escape_text(options.title),
        styles = BASELINE_STYLES,
        body = body,
    )
}

/// Extra attributes and head nodes layered over a parsed document at serialization time.
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    pub attributes: HashMap<NodeId, Vec<(String, String)>>,
    /// Raw markup appended to the end of `<head>`.
    pub head: Vec<String>,
}

impl Overlay {
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        let attributes = self.attributes.entry(node).or_default();
        match attributes.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.to_string(),
            None => attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(attributes) = self.attributes.get_mut(&node) {
            attributes.retain(|(n, _)| n != name);
            if attributes.is_empty() {
                self.attributes.remove(&node);
            }
        }
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attributes
            .get(&node)
            .is_some_and(|attributes| attributes.iter().any(|(n, _)| n == name))
    }

    /// Nodes carrying `name`, in no particular order.
    pub fn nodes_with(&self, name: &str) -> Vec<NodeId> {
        self.attributes
            .iter()
            .filter(|(_, attributes)| attributes.iter().any(|(n, _)| n == name))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Serializes `document` with `overlay` applied. Iterative, so deep trees cannot overflow.
pub fn serialize(document: &Html, overlay: &Overlay) -> String {
    let mut out = String::new();
    let mut raw_text_depth = 0usize;

    for edge in document.tree.root().traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Doctype(doctype) => {
                    let _ = write!(out, "<!DOCTYPE {}>", doctype.name());
                }
                Node::Comment(comment) => {
                    let _ = write!(out, "<!--{}-->", &**comment);
                }
                Node::Text(text) => {
                    if raw_text_depth > 0 {
                        out.push_str(text);
                    } else {
                        out.push_str(&escape_text(text));
                    }
                }
                Node::Element(element) => {
                    let _ = write!(out, "<{}", element.name());
                    for (name, value) in element.attrs() {
                        let _ = write!(out, " {}=\"{}\"", name, escape_attribute(value));
                    }
                    if let Some(extra) = overlay.attributes.get(&node.id()) {
                        for (name, value) in extra {
                            if element.attr(name).is_none() {
                                let _ = write!(out, " {}=\"{}\"", name, escape_attribute(value));
                            }
                        }
                    }
                    out.push('>');
                    if RAW_TEXT_ELEMENTS.contains(&element.name()) {
                        raw_text_depth += 1;
                    }
                }
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(element) = node.value() {
                    let name = element.name();
                    if name == "head" {
                        for extra in &overlay.head {
                            out.push_str(extra);
                        }
                    }
                    if RAW_TEXT_ELEMENTS.contains(&name) {
                        raw_text_depth = raw_text_depth.saturating_sub(1);
                    }
                    if !VOID_ELEMENTS.contains(&name) {
                        let _ = write!(out, "</{}>", name);
                    }
                }
            }
        }
    }

    out
}

pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attribute(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}
