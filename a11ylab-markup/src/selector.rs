//! Stable selectors for elements of one parsed document.
//!
//! Preference order: unique `id`, unique test identifier, tag + role + name attribute, and
//! finally the same composite pinned with an `:nth-of-type` path. Every candidate is checked
//! by re-querying the document, so the returned selector always resolves to the element.

use crate::error::{MarkupError, MarkupResult};
use scraper::{ElementRef, Html, Selector};
use std::fmt::Write;

const TEST_ID_ATTRIBUTES: &[&str] = &["data-testid", "data-test-id", "data-test"];

/// Attributes that carry an element's accessible name and can be matched by a selector.
const NAME_ATTRIBUTES: &[&str] = &["aria-label", "alt", "title"];

/// Builds a selector that resolves to `element` within `document`.
pub fn selector_for(document: &Html, element: ElementRef<'_>) -> String {
    if let Some(id) = element.value().id().filter(|id| !id.is_empty()) {
        let candidate = format!("#{}", escape_identifier(id));
        if is_unique(document, &candidate, element) {
            return candidate;
        }
    }

    for attribute in TEST_ID_ATTRIBUTES {
        if let Some(value) = element.value().attr(attribute).filter(|v| !v.is_empty()) {
            let candidate = format!("[{}={}]", attribute, quote(value));
            if is_unique(document, &candidate, element) {
                return candidate;
            }
        }
    }

    let composite = composite(element);
    if is_unique(document, &composite, element) {
        return composite;
    }
    structural_path(document, element, &composite)
}

/// Re-queries `selector`, returning the first match. Unparseable selectors resolve to nothing.
pub fn resolve<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let parsed = parse(selector).ok()?;
    let found = document.select(&parsed).next();
    found
}

/// Parses a selector, keeping the original text in the error.
pub fn parse(selector: &str) -> MarkupResult<Selector> {
    Selector::parse(selector).map_err(|_| MarkupError::InvalidSelector {
        selector: selector.to_string(),
    })
}

fn is_unique(document: &Html, candidate: &str, element: ElementRef<'_>) -> bool {
    let Ok(parsed) = parse(candidate) else {
        return false;
    };
    let mut matches = document.select(&parsed);
    match (matches.next(), matches.next()) {
        (Some(first), None) => first.id() == element.id(),
        _ => false,
    }
}

fn composite(element: ElementRef<'_>) -> String {
    let mut out = element.value().name().to_string();
    if let Some(role) = element.value().attr("role") {
        let _ = write!(out, "[role={}]", quote(role));
    }
    if let Some((attribute, value)) = NAME_ATTRIBUTES
        .iter()
        .find_map(|a| element.value().attr(a).map(|v| (*a, v)))
    {
        let _ = write!(out, "[{}={}]", attribute, quote(value));
    }
    out
}

fn nth_of_type(element: ElementRef<'_>) -> usize {
    let name = element.value().name();
    element
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|sibling| sibling.value().name() == name)
        .count()
        + 1
}

fn structural_path(document: &Html, element: ElementRef<'_>, composite: &str) -> String {
    let mut steps = vec![format!("{}:nth-of-type({})", composite, nth_of_type(element))];

    for ancestor in element.ancestors().filter_map(ElementRef::wrap) {
        if let Some(id) = ancestor.value().id().filter(|id| !id.is_empty()) {
            let anchor = format!("#{}", escape_identifier(id));
            if is_unique(document, &anchor, ancestor) {
                steps.push(anchor);
                break;
            }
        }
        steps.push(format!(
            "{}:nth-of-type({})",
            ancestor.value().name(),
            nth_of_type(ancestor)
        ));
    }

    steps.reverse();
    steps.join(" > ")
}

/// CSS identifier escaping (the CSSOM `CSS.escape` algorithm).
pub fn escape_identifier(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let chars: Vec<char> = value.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        match ch {
            '\0' => out.push('\u{FFFD}'),
            '\u{1}'..='\u{1f}' | '\u{7f}' => {
                let _ = write!(out, "\\{:x} ", ch as u32);
            }
            '0'..='9' if i == 0 || (i == 1 && chars[0] == '-') => {
                let _ = write!(out, "\\{:x} ", ch as u32);
            }
            '-' if i == 0 && chars.len() == 1 => out.push_str("\\-"),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() => out.push(c),
            c => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    out
}

/// Double-quoted CSS string.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push('\u{FFFD}'),
            c if c.is_control() => {
                let _ = write!(out, "\\{:x} ", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrips(html: &str, target: &str) -> String {
        let document = Html::parse_document(html);
        let selector = parse(target).unwrap();
        let element = document.select(&selector).next().unwrap();
        let generated = selector_for(&document, element);
        let found = resolve(&document, &generated).expect("generated selector must resolve");
        assert_eq!(found.id(), element.id(), "{} resolved elsewhere", generated);
        generated
    }

    #[test]
    fn test_prefers_unique_id() {
        let s = roundtrips(r#"<button id="save">Save</button>"#, "button");
        assert_eq!(s, "#save");
    }

    #[test]
    fn test_escapes_awkward_ids() {
        assert_eq!(escape_identifier("1st"), "\\31 st");
        assert_eq!(escape_identifier("a:b c"), "a\\:b\\ c");
        assert_eq!(escape_identifier("-"), "\\-");
        let s = roundtrips(r#"<input id="user.name:1">"#, "input");
        assert_eq!(s, "#user\\.name\\:1");
    }

    #[test]
    fn test_duplicate_ids_fall_through_to_test_id() {
        let html = r#"<a id="x" href="/">A</a><a id="x" data-testid="second" href="/b">B</a>"#;
        let s = roundtrips(html, "[data-testid]");
        assert_eq!(s, r#"[data-testid="second"]"#);
    }

    #[test]
    fn test_composite_uses_role_and_name_attribute() {
        let html = r#"<div role="button" aria-label="Close">x</div><div role="button">y</div>"#;
        let s = roundtrips(html, "div[aria-label]");
        assert_eq!(s, r#"div[role="button"][aria-label="Close"]"#);
    }

    #[test]
    fn test_pins_ambiguous_elements_with_a_path() {
        let html = r#"<ul id="menu"><li><img src="a.png"></li><li><img src="b.png"></li></ul>"#;
        let s = roundtrips(html, r#"img[src="b.png"]"#);
        assert_eq!(s, "#menu > li:nth-of-type(2) > img:nth-of-type(1)");
    }

    #[test]
    fn test_quotes_attribute_values() {
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
        let s = roundtrips(r#"<img alt='say "hi"' src="x"><img src="y">"#, "img");
        assert_eq!(s, r#"img[alt="say \"hi\""]"#);
    }

    #[test]
    fn test_unparseable_selectors_resolve_to_nothing() {
        let document = Html::parse_document("<p>x</p>");
        assert!(resolve(&document, "p[").is_none());
    }
}
