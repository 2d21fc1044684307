//! Best-effort rewrite of JSX-flavoured snippets into plain HTML.
//!
//! A hand-written start-tag scanner plus a few regexes, not a JSX parser. Known lossy cases:
//! - `{expression}` attribute values that are not literals are dropped, leaving a comment marker
//! - handlers other than `() => call(args)` are dropped, leaving a comment marker
//! - `{expression}` children other than string/number literals and comments are kept verbatim
//! - component tags (`<Card>`) pass through untouched and render as unknown elements
//!
//! Any scan failure (unterminated tag, quote or expression) returns the input unchanged.

use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// JSX property names that differ from their HTML attribute names.
const ATTRIBUTE_NAMES: &[(&str, &str)] = &[
    ("className", "class"),
    ("htmlFor", "for"),
    ("tabIndex", "tabindex"),
    ("readOnly", "readonly"),
    ("maxLength", "maxlength"),
    ("minLength", "minlength"),
    ("autoFocus", "autofocus"),
    ("autoComplete", "autocomplete"),
    ("autoPlay", "autoplay"),
    ("contentEditable", "contenteditable"),
    ("spellCheck", "spellcheck"),
    ("srcSet", "srcset"),
    ("colSpan", "colspan"),
    ("rowSpan", "rowspan"),
    ("crossOrigin", "crossorigin"),
    ("encType", "enctype"),
    ("noValidate", "novalidate"),
    ("formNoValidate", "formnovalidate"),
    ("acceptCharset", "accept-charset"),
    ("dateTime", "datetime"),
    ("useMap", "usemap"),
    ("defaultValue", "value"),
    ("defaultChecked", "checked"),
];

/// Style properties React leaves without a `px` suffix.
const UNITLESS_STYLE_PROPERTIES: &[&str] = &[
    "opacity",
    "zIndex",
    "fontWeight",
    "lineHeight",
    "flex",
    "flexGrow",
    "flexShrink",
    "order",
    "zoom",
];

/// Rewrites `source` into plain markup. Never fails: returns the input on any scan failure.
pub fn normalize(source: &str) -> String {
    match rewrite(source) {
        Ok(rewritten) => rewritten,
        Err(failure) => {
            tracing::debug!(
                offset = failure.offset,
                reason = failure.reason,
                "markup rewrite failed, keeping source as-is"
            );
            source.to_string()
        }
    }
}

#[derive(Debug)]
struct RewriteFailure {
    offset: usize,
    reason: &'static str,
}

fn fail(offset: usize, reason: &'static str) -> RewriteFailure {
    RewriteFailure { offset, reason }
}

fn rewrite(source: &str) -> Result<String, RewriteFailure> {
    let mut out = String::with_capacity(source.len() + 16);
    let mut i = 0;

    while let Some(ch) = source[i..].chars().next() {
        let rest = &source[i..];

        if rest.starts_with("<!--") {
            let end = rest
                .find("-->")
                .ok_or_else(|| fail(i, "unterminated comment"))?
                + 3;
            out.push_str(&rest[..end]);
            i += end;
        } else if rest.starts_with("</>") {
            i += 3;
        } else if rest.starts_with("<>") {
            i += 2;
        } else if ch == '<' && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let tag = scan_start_tag(source, i)?;
            i = tag.end;
            out.push_str(&render_tag(&tag));

            let lower = tag.name.to_ascii_lowercase();
            if !tag.self_closing && RAW_TEXT_ELEMENTS.contains(&lower.as_str()) {
                // Raw text runs untouched up to the matching end tag (or the end of input).
                let close = format!("</{}", lower);
                let len = source[i..]
                    .to_ascii_lowercase()
                    .find(&close)
                    .unwrap_or(source.len() - i);
                out.push_str(&source[i..i + len]);
                i += len;
            }
        } else if ch == '{' {
            let expression = scan_balanced(source, i)
                .ok()
                .and_then(|(inner, end)| text_expression(inner).map(|text| (text, end)));
            match expression {
                Some((text, end)) => {
                    out.push_str(&text);
                    i = end;
                }
                None => {
                    out.push('{');
                    i += 1;
                }
            }
        } else {
            out.push(ch);
            i += ch.len_utf8();
        }
    }

    Ok(out)
}

// ─── Scanning ────────────────────────────────────────────────────────────────

struct StartTag {
    name: String,
    attributes: Vec<RawAttribute>,
    self_closing: bool,
    end: usize,
}

struct RawAttribute {
    /// Empty for spread attributes (`{...props}`).
    name: String,
    value: RawValue,
}

enum RawValue {
    Bare,
    Quoted { text: String, double: bool },
    Expression(String),
}

fn scan_while(bytes: &[u8], mut i: usize, pred: impl Fn(u8) -> bool) -> usize {
    while i < bytes.len() && pred(bytes[i]) {
        i += 1;
    }
    i
}

fn scan_start_tag(source: &str, start: usize) -> Result<StartTag, RewriteFailure> {
    let bytes = source.as_bytes();
    let name_end = scan_while(bytes, start + 1, |b| {
        b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':')
    });
    let name = source[start + 1..name_end].to_string();
    let mut attributes = Vec::new();
    let mut i = name_end;

    loop {
        i = scan_while(bytes, i, |b| b.is_ascii_whitespace());
        match bytes.get(i) {
            None => return Err(fail(start, "unterminated tag")),
            Some(b'>') => {
                return Ok(StartTag {
                    name,
                    attributes,
                    self_closing: false,
                    end: i + 1,
                })
            }
            Some(b'/') if bytes.get(i + 1) == Some(&b'>') => {
                return Ok(StartTag {
                    name,
                    attributes,
                    self_closing: true,
                    end: i + 2,
                })
            }
            Some(b'/') => i += 1,
            Some(b'{') => {
                let (inner, end) = scan_balanced(source, i)?;
                attributes.push(RawAttribute {
                    name: String::new(),
                    value: RawValue::Expression(inner.to_string()),
                });
                i = end;
            }
            Some(_) => {
                let name_end = scan_while(bytes, i, |b| {
                    !b.is_ascii_whitespace()
                        && !matches!(b, b'=' | b'>' | b'/' | b'"' | b'\'' | b'{' | b'}' | b'<')
                });
                if name_end == i {
                    return Err(fail(i, "malformed attribute"));
                }
                let attribute_name = source[i..name_end].to_string();
                i = scan_while(bytes, name_end, |b| b.is_ascii_whitespace());

                if bytes.get(i) != Some(&b'=') {
                    attributes.push(RawAttribute {
                        name: attribute_name,
                        value: RawValue::Bare,
                    });
                    continue;
                }

                i = scan_while(bytes, i + 1, |b| b.is_ascii_whitespace());
                let value = match bytes.get(i) {
                    Some(&quote) if quote == b'"' || quote == b'\'' => {
                        let close = source[i + 1..]
                            .find(quote as char)
                            .ok_or_else(|| fail(i, "unterminated attribute value"))?;
                        let text = source[i + 1..i + 1 + close].to_string();
                        i += close + 2;
                        RawValue::Quoted {
                            text,
                            double: quote == b'"',
                        }
                    }
                    Some(b'{') => {
                        let (inner, end) = scan_balanced(source, i)?;
                        i = end;
                        RawValue::Expression(inner.to_string())
                    }
                    Some(_) => {
                        let end = scan_while(bytes, i, |b| !b.is_ascii_whitespace() && b != b'>');
                        let text = source[i..end].to_string();
                        i = end;
                        RawValue::Quoted {
                            text,
                            double: false,
                        }
                    }
                    None => return Err(fail(i, "unterminated tag")),
                };
                attributes.push(RawAttribute {
                    name: attribute_name,
                    value,
                });
            }
        }
    }
}

/// Scans a `{...}` expression starting at `start`, skipping braces inside string literals.
/// Returns the inner text and the offset just past the closing brace.
fn scan_balanced(source: &str, start: usize) -> Result<(&str, usize), RewriteFailure> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'"' | b'\'' | b'`' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok((&source[start + 1..i], i + 1));
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }

    Err(fail(start, "unterminated expression"))
}

// ─── Translation ─────────────────────────────────────────────────────────────

enum Literal {
    Str(String),
    Num(String),
    Bool(bool),
}

fn literal_regex() -> &'static Regex {
    static LITERAL_REGEX: OnceLock<Regex> = OnceLock::new();
    LITERAL_REGEX.get_or_init(|| {
        Regex::new(
            r#"^\s*(?:"([^"\\]*)"|'([^'\\]*)'|`([^`$\\]*)`|(-?\d+(?:\.\d+)?)|(true|false))\s*$"#,
        )
        .unwrap()
    })
}

fn classify_literal(expression: &str) -> Option<Literal> {
    let caps = literal_regex().captures(expression)?;
    if let Some(s) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
        return Some(Literal::Str(s.as_str().to_string()));
    }
    if let Some(n) = caps.get(4) {
        return Some(Literal::Num(n.as_str().to_string()));
    }
    caps.get(5).map(|b| Literal::Bool(b.as_str() == "true"))
}

/// `{"text"}`, `{42}` and `{/* comment */}` children.
fn text_expression(inner: &str) -> Option<String> {
    let trimmed = inner.trim();
    if let Some(comment) = trimmed.strip_prefix("/*").and_then(|c| c.strip_suffix("*/")) {
        return Some(format!("<!-- {} -->", comment.trim().replace("--", "- -")));
    }
    match classify_literal(trimmed)? {
        Literal::Str(s) | Literal::Num(s) => Some(escape_text(&s)),
        Literal::Bool(_) => Some(String::new()),
    }
}

enum Translated {
    Keep { name: String, value: Option<String> },
    Drop,
    Removed(String),
}

fn html_attribute_name(name: &str) -> String {
    if let Some((_, html)) = ATTRIBUTE_NAMES.iter().find(|(jsx, _)| *jsx == name) {
        return html.to_string();
    }
    if is_jsx_handler(name) {
        return name.to_ascii_lowercase();
    }
    name.to_string()
}

fn is_jsx_handler(name: &str) -> bool {
    name.len() > 2 && name.starts_with("on") && name[2..].starts_with(|c: char| c.is_ascii_uppercase())
}

fn render_tag(tag: &StartTag) -> String {
    let mut out = format!("<{}", tag.name);
    let mut markers = Vec::new();

    for attribute in &tag.attributes {
        match translate_attribute(attribute) {
            Translated::Keep { name, value: None } => {
                let _ = write!(out, " {}", name);
            }
            Translated::Keep {
                name,
                value: Some(value),
            } => {
                let _ = write!(out, " {}=\"{}\"", name, value);
            }
            Translated::Drop => {}
            Translated::Removed(marker) => markers.push(marker),
        }
    }
    out.push('>');

    let void = VOID_ELEMENTS.contains(&tag.name.to_ascii_lowercase().as_str());
    if tag.self_closing && !void {
        let _ = write!(out, "</{}>", tag.name);
    }
    for marker in markers {
        out.push_str(&marker);
    }
    out
}

fn translate_attribute(attribute: &RawAttribute) -> Translated {
    if attribute.name.is_empty() {
        return Translated::Removed("<!-- spread attributes removed -->".to_string());
    }

    let name = html_attribute_name(&attribute.name);
    match &attribute.value {
        RawValue::Bare => Translated::Keep { name, value: None },
        RawValue::Quoted { text, double } => Translated::Keep {
            name,
            value: Some(if *double {
                text.clone()
            } else {
                text.replace('"', "&quot;")
            }),
        },
        RawValue::Expression(expression)
            if attribute.name.len() > 2 && attribute.name.starts_with("on") =>
        {
            match simple_call(expression) {
                Some(call) => Translated::Keep {
                    name: name.to_ascii_lowercase(),
                    value: Some(call),
                },
                None => Translated::Removed(format!(
                    "<!-- {} handler removed (not supported in HTML) -->",
                    attribute.name
                )),
            }
        }
        RawValue::Expression(expression) => translate_expression(&attribute.name, name, expression),
    }
}

fn translate_expression(original: &str, name: String, expression: &str) -> Translated {
    let lower = name.to_ascii_lowercase();
    let textual_booleans = lower.starts_with("aria-") || lower.starts_with("data-");

    match classify_literal(expression) {
        Some(Literal::Str(s)) => Translated::Keep {
            name,
            value: Some(escape_attribute(&s)),
        },
        Some(Literal::Num(n)) => Translated::Keep {
            name,
            value: Some(n),
        },
        Some(Literal::Bool(flag)) if textual_booleans => Translated::Keep {
            name,
            value: Some(flag.to_string()),
        },
        Some(Literal::Bool(true)) => Translated::Keep { name, value: None },
        Some(Literal::Bool(false)) => Translated::Drop,
        None if lower == "style" => match style_object(expression) {
            Some(css) => Translated::Keep {
                name,
                value: Some(escape_attribute(&css)),
            },
            None => Translated::Removed("<!-- style expression removed -->".to_string()),
        },
        None => Translated::Removed(format!("<!-- {} expression removed -->", original)),
    }
}

fn arrow_regex() -> &'static Regex {
    static ARROW_REGEX: OnceLock<Regex> = OnceLock::new();
    ARROW_REGEX.get_or_init(|| Regex::new(r"(?s)^\(\s*\)\s*=>\s*(.+)$").unwrap())
}

fn call_regex() -> &'static Regex {
    static CALL_REGEX: OnceLock<Regex> = OnceLock::new();
    CALL_REGEX.get_or_init(|| {
        Regex::new(
            r#"^[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*\((?:[^(){}"'`]|"[^"]*"|'[^']*')*\)$"#,
        )
        .unwrap()
    })
}

/// `() => alert("Hi")` or `() => { alert("Hi"); }` becomes `alert('Hi')`.
fn simple_call(expression: &str) -> Option<String> {
    let caps = arrow_regex().captures(expression.trim())?;
    let body = caps.get(1)?.as_str().trim();
    let body = body
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .map(str::trim)
        .unwrap_or(body);
    let body = body.trim_end_matches(';').trim();

    if !call_regex().is_match(body) {
        return None;
    }
    Some(if body.contains('\'') {
        body.replace('"', "&quot;")
    } else {
        body.replace('"', "'")
    })
}

fn style_pair_regex() -> &'static Regex {
    static STYLE_PAIR_REGEX: OnceLock<Regex> = OnceLock::new();
    STYLE_PAIR_REGEX.get_or_init(|| {
        Regex::new(
            r#"^\s*["']?([A-Za-z][A-Za-z0-9-]*)["']?\s*:\s*(?:"([^"]*)"|'([^']*)'|(-?\d+(?:\.\d+)?))\s*$"#,
        )
        .unwrap()
    })
}

/// `{ fontSize: 12, color: 'red' }` becomes `font-size: 12px; color: red`.
fn style_object(expression: &str) -> Option<String> {
    let inner = expression
        .trim()
        .strip_prefix('{')?
        .strip_suffix('}')?;

    let mut declarations = Vec::new();
    for piece in split_top_level_commas(inner) {
        if piece.trim().is_empty() {
            continue;
        }
        let caps = style_pair_regex().captures(piece)?;
        let property = caps.get(1)?.as_str();
        let value = if let Some(text) = caps.get(2).or_else(|| caps.get(3)) {
            text.as_str().to_string()
        } else {
            let number = caps.get(4)?.as_str();
            if number == "0" || UNITLESS_STYLE_PROPERTIES.contains(&property) {
                number.to_string()
            } else {
                format!("{}px", number)
            }
        };
        declarations.push(format!("{}: {}", camel_to_kebab(property), value));
    }
    Some(declarations.join("; "))
}

fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == ',' => {
                pieces.push(&text[start..i]);
                start = i + 1;
            }
            None => {}
        }
    }
    pieces.push(&text[start..]);
    pieces
}

fn camel_to_kebab(property: &str) -> String {
    let mut out = String::with_capacity(property.len() + 4);
    for ch in property.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Braces are encoded too, so unwrapped text is never read as an expression again.
fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('{', "&#123;")
        .replace('}', "&#125;")
}

fn escape_attribute(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translates_class_and_for() {
        let out = normalize(r#"<label htmlFor="email" className={"field"}>Email</label>"#);
        assert_eq!(out, r#"<label for="email" class="field">Email</label>"#);
    }

    #[test]
    fn test_unwraps_numeric_and_boolean_literals() {
        let out = normalize(r#"<input tabIndex={-1} disabled={true} required={false} aria-hidden={true} />"#);
        assert_eq!(out, r#"<input tabindex="-1" disabled aria-hidden="true">"#);
    }

    #[test]
    fn test_converts_simple_alert_handler() {
        let out = normalize(r#"<button onClick={() => alert("Saved")}>Save</button>"#);
        assert_eq!(out, r#"<button onclick="alert('Saved')">Save</button>"#);
    }

    #[test]
    fn test_replaces_complex_handler_with_marker() {
        let out = normalize(r#"<div onKeyDown={(e) => { if (e.key === "Enter") go() }} role="button">Go</div>"#);
        assert_eq!(
            out,
            r#"<div role="button"><!-- onKeyDown handler removed (not supported in HTML) -->Go</div>"#
        );
    }

    #[test]
    fn test_expands_non_void_self_closing_tags() {
        assert_eq!(normalize(r#"<div className="box" />"#), r#"<div class="box"></div>"#);
        assert_eq!(normalize(r#"<img src="a.png" alt="" />"#), r#"<img src="a.png" alt="">"#);
    }

    #[test]
    fn test_converts_style_objects() {
        let out = normalize(r#"<p style={{ fontSize: 14, color: 'red', opacity: 0.5 }}>x</p>"#);
        assert_eq!(out, r#"<p style="font-size: 14px; color: red; opacity: 0.5">x</p>"#);
    }

    #[test]
    fn test_drops_unknown_expressions_with_marker() {
        let out = normalize(r#"<img src={logo} alt="Logo" />"#);
        assert_eq!(out, r#"<img alt="Logo"><!-- src expression removed -->"#);
    }

    #[test]
    fn test_strips_fragments_and_converts_comments() {
        let out = normalize("<>{/* note */}<p>{\"a < b\"}</p></>");
        assert_eq!(out, "<!-- note --><p>a &lt; b</p>");
    }

    #[test]
    fn test_encodes_braces_in_unwrapped_text() {
        let once = normalize(r#"<p>{"{1}"} and {"}{"}</p>"#);
        assert_eq!(once, "<p>&#123;1&#125; and &#125;&#123;</p>");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_leaves_script_bodies_alone() {
        let src = r#"<script type="text/luau">if x < 1 then print("{0}") end</script>"#;
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn test_falls_back_on_unterminated_tag() {
        let src = r#"<button className="x" onClick={() => go()"#;
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn test_keeps_multibyte_text() {
        let src = "<p className=\"t\">접근성 — 확인</p>";
        assert_eq!(normalize(src), "<p class=\"t\">접근성 — 확인</p>");
    }
}
