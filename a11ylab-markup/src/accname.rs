//! Role, accessible name/description and focusability of elements.
//!
//! Name order: `aria-label`, image `alt` (verbatim, empty included), label association
//! (`aria-labelledby`, `label[for]`, wrapping `<label>`), button-like input `value`, text
//! content, `title`.

use ego_tree::iter::Edge;
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};

/// How an image's `alt` attribute is set. Lets callers tell a missing alt from a decorative one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltState {
    Missing,
    Empty,
    Present,
}

const NATIVE_INTERACTIVE: &[&str] = &["button", "select", "textarea", "summary"];

const LABELABLE: &[&str] = &["input", "select", "textarea", "button", "meter", "output", "progress"];

/// Roles that make an otherwise inert element focusable for the snapshot.
const FOCUSABLE_ROLES: &[&str] = &["button", "link", "checkbox", "tab"];

const HIDDEN_CONTENT: &[&str] = &["script", "style", "template", "noscript"];

pub fn is_image(element: ElementRef<'_>) -> bool {
    element.value().name() == "img"
}

pub fn alt_state(element: ElementRef<'_>) -> Option<AltState> {
    if !is_image(element) {
        return None;
    }
    Some(match element.value().attr("alt") {
        None => AltState::Missing,
        Some("") => AltState::Empty,
        Some(_) => AltState::Present,
    })
}

fn input_type(element: ElementRef<'_>) -> String {
    element
        .value()
        .attr("type")
        .map(|t| t.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "text".to_string())
}

/// Natively interactive elements: links and areas with `href`, form controls, `summary`,
/// and media with `controls`.
pub fn is_native_interactive(element: ElementRef<'_>) -> bool {
    let el = element.value();
    match el.name() {
        "a" | "area" => el.attr("href").is_some(),
        "input" => input_type(element) != "hidden",
        "audio" | "video" => el.attr("controls").is_some(),
        name => NATIVE_INTERACTIVE.contains(&name),
    }
}

pub fn is_content_editable(element: ElementRef<'_>) -> bool {
    element
        .value()
        .attr("contenteditable")
        .is_some_and(|v| !v.eq_ignore_ascii_case("false"))
}

pub fn tabindex(element: ElementRef<'_>) -> Option<i32> {
    element.value().attr("tabindex")?.trim().parse().ok()
}

pub fn explicit_role(element: ElementRef<'_>) -> Option<String> {
    element
        .value()
        .attr("role")?
        .split_whitespace()
        .next()
        .map(str::to_ascii_lowercase)
}

pub fn implicit_role(element: ElementRef<'_>) -> Option<&'static str> {
    let el = element.value();
    let role = match el.name() {
        "a" | "area" if el.attr("href").is_some() => "link",
        "button" => "button",
        "input" => match input_type(element).as_str() {
            "checkbox" => "checkbox",
            "radio" => "radio",
            "button" | "submit" | "reset" | "image" => "button",
            "range" => "slider",
            "number" => "spinbutton",
            "search" => "searchbox",
            "text" | "email" | "tel" | "url" | "" => "textbox",
            _ => return None,
        },
        "select" if el.attr("multiple").is_some() => "listbox",
        "select" => "combobox",
        "textarea" => "textbox",
        "img" if el.attr("alt") == Some("") => "presentation",
        "img" => "img",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "nav" => "navigation",
        "main" => "main",
        "header" => "banner",
        "footer" => "contentinfo",
        "aside" => "complementary",
        "ul" | "ol" => "list",
        "li" => "listitem",
        "table" => "table",
        "dialog" => "dialog",
        "details" => "group",
        "progress" => "progressbar",
        "meter" => "meter",
        "output" => "status",
        _ => return None,
    };
    Some(role)
}

/// Explicit role first, then the tag's implicit role.
pub fn role(element: ElementRef<'_>) -> Option<String> {
    explicit_role(element).or_else(|| implicit_role(element).map(str::to_string))
}

pub fn is_focusable(element: ElementRef<'_>) -> bool {
    if element.value().attr("disabled").is_some() {
        return false;
    }
    if tabindex(element).is_some_and(|t| t >= 0) {
        return true;
    }
    if is_native_interactive(element) || is_content_editable(element) {
        return true;
    }
    explicit_role(element).is_some_and(|r| FOCUSABLE_ROLES.contains(&r.as_str()))
}

pub fn element_by_id<'a>(document: &'a Html, id: &str) -> Option<ElementRef<'a>> {
    document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().id() == Some(id))
}

fn referenced_text(document: &Html, ids: &str) -> String {
    let parts: Vec<String> = ids
        .split_whitespace()
        .filter_map(|id| element_by_id(document, id))
        .map(|target| text_content(target, None))
        .filter(|t| !t.is_empty())
        .collect();
    parts.join(" ")
}

fn label_text(document: &Html, element: ElementRef<'_>) -> Option<String> {
    if let Some(ids) = element.value().attr("aria-labelledby") {
        let text = referenced_text(document, ids);
        if !text.is_empty() {
            return Some(text);
        }
    }

    if !LABELABLE.contains(&element.value().name()) {
        return None;
    }

    if let Some(id) = element.value().id().filter(|id| !id.is_empty()) {
        let text: Vec<String> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == "label" && e.value().attr("for") == Some(id))
            .map(|label| text_content(label, None))
            .filter(|t| !t.is_empty())
            .collect();
        if !text.is_empty() {
            return Some(text.join(" "));
        }
    }

    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "label")
        .map(|label| text_content(label, Some(element.id())))
        .filter(|t| !t.is_empty())
}

fn button_input_value(element: ElementRef<'_>) -> Option<String> {
    if element.value().name() != "input" {
        return None;
    }
    let kind = input_type(element);
    match element.value().attr("value").map(str::trim) {
        Some(v) if !v.is_empty() && matches!(kind.as_str(), "submit" | "reset" | "button") => {
            Some(v.to_string())
        }
        None | Some("") if kind == "submit" => Some("Submit".to_string()),
        None | Some("") if kind == "reset" => Some("Reset".to_string()),
        _ => None,
    }
}

/// Computes the accessible name. Returns an empty string when nothing names the element.
pub fn accessible_name(document: &Html, element: ElementRef<'_>) -> String {
    let el = element.value();

    if let Some(label) = el.attr("aria-label").map(str::trim).filter(|l| !l.is_empty()) {
        return label.to_string();
    }

    if is_image(element) || (el.name() == "input" && input_type(element) == "image") {
        if let Some(alt) = el.attr("alt") {
            return alt.to_string();
        }
    }

    if let Some(label) = label_text(document, element) {
        return label;
    }

    if let Some(value) = button_input_value(element) {
        return value;
    }

    if !matches!(el.name(), "input" | "select" | "textarea" | "img") {
        let text = text_content(element, None);
        if !text.is_empty() {
            return text;
        }
    }

    el.attr("title")
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

pub fn accessible_description(document: &Html, element: ElementRef<'_>) -> Option<String> {
    let ids = element.value().attr("aria-describedby")?;
    let text = referenced_text(document, ids);
    (!text.is_empty()).then_some(text)
}

/// Whitespace-collapsed text of `element`, including descendant image `alt` text and
/// skipping `aria-hidden` subtrees, non-rendered content and the subtree rooted at `skip`.
pub fn text_content(element: ElementRef<'_>, skip: Option<NodeId>) -> String {
    let mut raw = String::new();
    let mut hidden_until: Option<NodeId> = None;

    for edge in element.traverse() {
        match edge {
            Edge::Open(node) => {
                if hidden_until.is_some() {
                    continue;
                }
                match node.value() {
                    Node::Element(el) => {
                        let hidden = Some(node.id()) == skip
                            || (node.id() != element.id()
                                && el.attr("aria-hidden") == Some("true"))
                            || HIDDEN_CONTENT.contains(&el.name());
                        if hidden {
                            hidden_until = Some(node.id());
                        } else if el.name() == "img" {
                            if let Some(alt) = el.attr("alt") {
                                raw.push(' ');
                                raw.push_str(alt);
                                raw.push(' ');
                            }
                        }
                    }
                    Node::Text(text) => raw.push_str(text),
                    _ => {}
                }
            }
            Edge::Close(node) => {
                if hidden_until == Some(node.id()) {
                    hidden_until = None;
                }
            }
        }
    }

    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
