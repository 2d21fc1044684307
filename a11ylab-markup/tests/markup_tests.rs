use a11ylab_markup::accname::{accessible_name, alt_state, is_focusable};
use a11ylab_markup::{build_shell, normalize, resolve, selector_for, AltState, ShellOptions};
use pretty_assertions::assert_eq;
use scraper::{ElementRef, Html};

const CUSTOM_BUTTON: &str = r#"<div
  role="button"
  tabIndex={0}
  onClick={() => alert("clicked")}
  onKeyDown={(e) => {
    if (e.key === "Enter" || e.key === " ") alert("clicked")
  }}
>
  구독하기
</div>"#;

const LABELLED_INPUT: &str = r#"<label htmlFor="email">이메일</label>
<input id="email" type="email" autoComplete="email" />"#;

const SNIPPETS: &[&str] = &[
    r#"<img src="/promo-banner.png">"#,
    r#"<img src="/promo-banner.png" alt="프로모션 배너: 겨울 세일 최대 50% 할인" />"#,
    r#"<div onClick={() => alert("clicked")}>구독하기</div>"#,
    CUSTOM_BUTTON,
    LABELLED_INPUT,
    r#"<>
  {/* navigation */}
  <nav className="top" aria-label={"Main"}>
    <a href="/" onClick={handleClick}>Home</a>
    <button disabled={false} style={{ marginTop: 8, fontWeight: 700 }}>Go</button>
  </nav>
</>"#,
    r#"<p title='He said "hi"'>{"Tom & Jerry"} {42}</p><hr/>"#,
    r#"<ul>{items.map((item) => <li key={item}>{item}</li>)}</ul>"#,
    r#"<p>{"{1}"}</p>"#,
    r#"<code>{"fn main() { println!(\"{}\", 1); }"}</code>"#,
    r#"<span title={"{x}"}>{'{'}{`}`}</span>"#,
];

fn parse(markup: &str) -> Html {
    Html::parse_document(&build_shell(markup, &ShellOptions::default()))
}

fn elements(document: &Html) -> Vec<ElementRef<'_>> {
    document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .collect()
}

#[test]
fn test_normalize_is_idempotent() {
    for snippet in SNIPPETS {
        let once = normalize(snippet);
        let twice = normalize(&once);
        assert_eq!(once, twice, "normalize not idempotent for {}", snippet);
    }
}

#[test]
fn test_custom_button_keeps_role_and_simple_handler() {
    let html = normalize(CUSTOM_BUTTON);
    assert!(html.starts_with(r#"<div role="button" tabindex="0" onclick="alert('clicked')">"#));
    assert!(html.contains("<!-- onKeyDown handler removed (not supported in HTML) -->"));
    assert!(!html.contains("e.key"));

    let document = parse(&html);
    let div = resolve(&document, r#"div[role="button"]"#).unwrap();
    assert!(is_focusable(div));
    assert_eq!(accessible_name(&document, div), "구독하기");
}

#[test]
fn test_label_association_survives_normalization() {
    let document = parse(&normalize(LABELLED_INPUT));
    let input = resolve(&document, "#email").unwrap();
    assert_eq!(input.value().attr("autocomplete"), Some("email"));
    assert_eq!(accessible_name(&document, input), "이메일");
}

#[test]
fn test_missing_alt_is_distinguished_from_empty_alt() {
    let document = parse(&normalize(r#"<img src="x.png"><img src="y.png" alt={""} />"#));
    let missing = resolve(&document, r#"img[src="x.png"]"#).unwrap();
    let empty = resolve(&document, r#"img[src="y.png"]"#).unwrap();
    assert_eq!(alt_state(missing), Some(AltState::Missing));
    assert_eq!(alt_state(empty), Some(AltState::Empty));
    assert_eq!(accessible_name(&document, missing), "");
    assert_eq!(accessible_name(&document, empty), "");
}

#[test]
fn test_every_element_selector_resolves_back_to_itself() {
    for snippet in SNIPPETS {
        let document = parse(&normalize(snippet));
        for element in elements(&document) {
            let selector = selector_for(&document, element);
            let found = resolve(&document, &selector)
                .unwrap_or_else(|| panic!("{} does not resolve", selector));
            assert_eq!(found.id(), element.id(), "{} resolved elsewhere", selector);
        }
    }
}

#[test]
fn test_malformed_input_is_returned_unchanged() {
    let broken = r#"<div className="card"><img src="a.png" alt="unterminated></div>"#;
    assert_eq!(normalize(broken), broken);
}
