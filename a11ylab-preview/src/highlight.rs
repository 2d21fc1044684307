//! Visual markers on the rendered document.
//!
//! Markers are overlay attributes, applied when the document is serialized, plus one
//! stylesheet in `<head>` that is inserted at most once per context.

use crate::audit::AuditIssue;
use crate::context::RenderHandle;
use crate::error::RenderError;
use crate::worker::Job;
use a11ylab_markup::{resolve, NodeId, Overlay};
use scraper::Html;
use serde::Serialize;
use tracing::debug;

pub const FOCUS_ATTRIBUTE: &str = "data-a11y-focus";
pub const VIOLATION_ATTRIBUTE: &str = "data-a11y-violation";
pub const MARKER_STYLE_ID: &str = "a11ylab-marker-style";

const MARKER_STYLES: &str = "[data-a11y-violation]{outline:3px dashed #d93025 !important;outline-offset:2px;}\
[data-a11y-focus]{outline:3px solid #1a73e8 !important;outline-offset:3px;box-shadow:0 0 0 6px rgba(26,115,232,.25);}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Focus,
    Violation,
}

impl Marker {
    pub fn attribute(self) -> &'static str {
        match self {
            Marker::Focus => FOCUS_ATTRIBUTE,
            Marker::Violation => VIOLATION_ATTRIBUTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HighlightOutcome {
    Applied { selector: String },
    Missed,
}

/// Moves the focus marker to the element `selector` resolves to and scrolls it into view.
/// Unresolvable or malformed selectors and closed contexts leave nothing marked.
pub async fn highlight(handle: &RenderHandle, selector: &str) -> HighlightOutcome {
    let outcome = handle
        .request(|reply| Job::Highlight {
            selector: selector.to_string(),
            reply,
        })
        .await;
    match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(handle = %handle.id(), selector, error = %err, "highlight skipped");
            HighlightOutcome::Missed
        }
    }
}

pub async fn clear_marks(handle: &RenderHandle, marker: Marker) -> Result<usize, RenderError> {
    handle
        .request(|reply| Job::ClearMarks { marker, reply })
        .await
}

/// Marks the first affected node of each issue in report order, then the remaining ones,
/// up to `cap` nodes in total.
pub async fn mark_violations(
    handle: &RenderHandle,
    issues: &[AuditIssue],
    cap: usize,
) -> Result<usize, RenderError> {
    let selectors = marking_order(issues);
    if selectors.is_empty() {
        return Ok(0);
    }
    handle
        .request(|reply| Job::MarkViolations {
            selectors,
            cap,
            reply,
        })
        .await
}

/// Selectors to mark: the first affected node of every issue, then the remaining nodes,
/// each selector once.
pub(crate) fn marking_order(issues: &[AuditIssue]) -> Vec<String> {
    let leading = issues.iter().filter_map(|i| i.affected_nodes.first());
    let trailing = issues.iter().flat_map(|i| i.affected_nodes.iter().skip(1));
    let mut selectors: Vec<String> = Vec::new();
    for node in leading.chain(trailing) {
        if !selectors.contains(&node.selector) {
            selectors.push(node.selector.clone());
        }
    }
    selectors
}

/// Returns `true` if the stylesheet was inserted by this call.
pub(crate) fn ensure_marker_style(document: &Html, overlay: &mut Overlay) -> bool {
    let marker = format!("id=\"{}\"", MARKER_STYLE_ID);
    if resolve(document, &format!("#{}", MARKER_STYLE_ID)).is_some()
        || overlay.head.iter().any(|node| node.contains(&marker))
    {
        return false;
    }
    overlay
        .head
        .push(format!("<style {}>{}</style>", marker, MARKER_STYLES));
    true
}

pub(crate) fn clear(overlay: &mut Overlay, marker: Marker) -> usize {
    let nodes = overlay.nodes_with(marker.attribute());
    for node in &nodes {
        overlay.remove_attribute(*node, marker.attribute());
    }
    nodes.len()
}

/// Returns the outcome and the node to scroll into view.
pub(crate) fn apply_focus(
    document: &Html,
    overlay: &mut Overlay,
    selector: &str,
) -> (HighlightOutcome, Option<NodeId>) {
    clear(overlay, Marker::Focus);
    let Some(element) = resolve(document, selector) else {
        return (HighlightOutcome::Missed, None);
    };
    ensure_marker_style(document, overlay);
    overlay.set_attribute(element.id(), FOCUS_ATTRIBUTE, "true");
    (
        HighlightOutcome::Applied {
            selector: selector.to_string(),
        },
        Some(element.id()),
    )
}

pub(crate) fn apply_violations(
    document: &Html,
    overlay: &mut Overlay,
    selectors: &[String],
    cap: usize,
) -> usize {
    let mut marked = overlay.nodes_with(VIOLATION_ATTRIBUTE).len();
    for selector in selectors {
        if marked >= cap {
            break;
        }
        let Some(element) = resolve(document, selector) else {
            continue;
        };
        if !overlay.has_attribute(element.id(), VIOLATION_ATTRIBUTE) {
            overlay.set_attribute(element.id(), VIOLATION_ATTRIBUTE, "true");
            marked += 1;
        }
    }
    if marked > 0 {
        ensure_marker_style(document, overlay);
    }
    marked
}
