//! Accessibility snapshot: the nodes a screen reader user would meet, in document order.

use crate::context::RenderHandle;
use crate::error::RenderError;
use crate::worker::Job;
use a11ylab_markup::accname::{self, AltState};
use a11ylab_markup::selector_for;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibleNode {
    pub selector: String,
    pub tag_name: String,
    pub role: Option<String>,
    pub accessible_name: String,
    pub accessible_description: Option<String>,
    pub is_focusable: bool,
    /// Only set for images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<AltState>,
}

fn body_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("body").unwrap())
}

fn is_candidate(element: ElementRef<'_>) -> bool {
    accname::is_native_interactive(element)
        || accname::is_image(element)
        || element.value().attrs().any(|(name, _)| {
            matches!(name, "role" | "tabindex" | "contenteditable") || name.starts_with("aria-")
        })
}

/// Walks the body in document order, considering at most `cap` candidates. A candidate is
/// kept if it has a role, a non-empty name or is focusable; images are always kept so
/// decorative (`alt=""`) ones stay visible.
pub fn collect(document: &Html, cap: usize) -> Vec<AccessibleNode> {
    let Some(body) = document.select(body_selector()).next() else {
        return Vec::new();
    };

    body.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| is_candidate(*e))
        .take(cap)
        .filter_map(|element| {
            let role = accname::role(element);
            let accessible_name = accname::accessible_name(document, element);
            let is_focusable = accname::is_focusable(element);
            let alt = accname::alt_state(element);
            let keep =
                role.is_some() || !accessible_name.is_empty() || is_focusable || alt.is_some();
            keep.then(|| AccessibleNode {
                selector: selector_for(document, element),
                tag_name: element.value().name().to_string(),
                role,
                accessible_name,
                accessible_description: accname::accessible_description(document, element),
                is_focusable,
                alt,
            })
        })
        .collect()
}

pub async fn extract(handle: &RenderHandle, cap: usize) -> Result<Vec<AccessibleNode>, RenderError> {
    handle.request(|reply| Job::Snapshot { cap, reply }).await
}
