//! # a11ylab preview engine
//!
//! Renders untrusted markup into an isolated render context, waits for it to settle, extracts
//! an accessibility snapshot, runs the `axle` rule engine inside the context and maps the
//! violations back to re-queryable selectors.
//!
//! A render context is a worker thread owning the parsed document and a sandboxed Luau
//! runtime. Every operation on it is a job on its channel, processed one at a time.
//!
//! ## Example
//! ```ignore
//! use a11ylab_preview::{PreviewConfig, PreviewSession};
//!
//! let session = PreviewSession::new(PreviewConfig::default());
//! session.submit(r#"<img src="/promo.png">"#, &[]).await;
//! let state = session.settled().await;
//! for issue in &state.issues {
//!     println!("{}: {}", issue.rule_id, issue.help_text);
//! }
//! ```

pub mod assets;
pub mod audit;
pub mod config;
pub mod context;
mod dom;
pub mod error;
pub mod highlight;
pub mod orchestrator;
pub mod queue;
mod sandbox;
pub mod snapshot;
pub mod stability;
mod worker;

pub use assets::{Asset, AssetCache, AssetKind, HttpImageLoader, ImageLoader, ImageState};
pub use audit::{
    AffectedNode, AuditIssue, AuditRunner, EngineFetcher, EngineSource, HttpEngineFetcher,
    Severity,
};
pub use config::PreviewConfig;
pub use context::{
    ClickOutcome, ClickReport, ContextManager, ErrorSink, HandleId, LifecycleEvent, LoadReport,
    RenderHandle,
};
pub use error::{AuditError, ConfigError, RenderError, RuntimeError, RuntimeErrorKind};
pub use highlight::HighlightOutcome;
pub use orchestrator::{AuditPhase, PreviewCycle, PreviewSession, PreviewState, RenderPhase};
pub use snapshot::AccessibleNode;
pub use stability::StabilityReport;
