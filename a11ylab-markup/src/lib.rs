//! # a11ylab markup utilities
//!
//! Pure, synchronous helpers shared by the preview engine:
//! - [`normalize`]: best-effort rewrite of JSX-flavoured snippets into plain HTML
//! - [`shell`]: the minimal document shell and an overlay-aware serializer
//! - [`selector`]: stable, escaped, re-queryable selectors for elements
//! - [`accname`]: role, accessible name/description and focusability
//!
//! ## Example
//! ```ignore
//! use a11ylab_markup::{normalize, shell};
//!
//! let html = normalize(r#"<label htmlFor="q">Search</label><input id="q" />"#);
//! let page = shell::build_shell(&html, &shell::ShellOptions::default());
//! let document = scraper::Html::parse_document(&page);
//! ```

pub mod accname;
pub mod error;
pub mod normalize;
pub mod selector;
pub mod shell;

pub use accname::AltState;
pub use error::{MarkupError, MarkupResult};
pub use normalize::normalize;
pub use selector::{resolve, selector_for};
pub use shell::{build_shell, serialize, Overlay, ShellOptions};

/// Re-exported so callers can hold node identities without naming `ego_tree` themselves.
pub use ego_tree::NodeId;
