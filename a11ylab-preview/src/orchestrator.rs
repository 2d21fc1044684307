//! Preview sessions: one live render context at a time, replaced on every submission.
//!
//! A submission tears down the previous context, normalizes the code, mounts a new context
//! and starts an analysis task (stability wait, then snapshot and audit in parallel). Every
//! result carries the identity of the handle it was computed for and is dropped when that
//! handle is no longer current, so a superseded cycle can never overwrite a newer one.

use crate::assets::{Asset, AssetCache, HttpImageLoader, ImageLoader};
use crate::audit::{AuditIssue, AuditRunner};
use crate::config::PreviewConfig;
use crate::context::{
    ClickOutcome, ClickReport, ContextManager, ErrorSink, HandleId, LifecycleEvent, RenderHandle,
};
use crate::error::RuntimeError;
use crate::highlight::{self, HighlightOutcome};
use crate::snapshot::{self, AccessibleNode};
use crate::stability::{self, StabilityReport};
use a11ylab_markup::normalize;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPhase {
    Idle,
    Loading,
    Ready,
    RuntimeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    Idle,
    Auditing,
    IssuesReady,
    AuditError,
    /// No context to audit: the render context could not be created.
    Skipped,
}

/// Observable state of a session, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewState {
    pub cycle: u64,
    pub render: RenderPhase,
    pub audit: AuditPhase,
    pub is_loading: bool,
    pub runtime_error: Option<RuntimeError>,
    pub issues: Vec<AuditIssue>,
    pub analysis_error: Option<String>,
    pub snapshot: Vec<AccessibleNode>,
    pub stability: Option<StabilityReport>,
}

impl PreviewState {
    fn idle() -> Self {
        Self {
            cycle: 0,
            render: RenderPhase::Idle,
            audit: AuditPhase::Idle,
            is_loading: false,
            runtime_error: None,
            issues: Vec::new(),
            analysis_error: None,
            snapshot: Vec::new(),
            stability: None,
        }
    }

    fn loading(cycle: u64) -> Self {
        Self {
            cycle,
            render: RenderPhase::Loading,
            is_loading: true,
            ..Self::idle()
        }
    }

    /// Nothing left to wait for in the current cycle.
    pub fn is_settled(&self) -> bool {
        match self.render {
            RenderPhase::Idle => true,
            _ => {
                !self.is_loading
                    && matches!(
                        self.audit,
                        AuditPhase::IssuesReady | AuditPhase::AuditError | AuditPhase::Skipped
                    )
            }
        }
    }
}

/// One submit-render-analyse pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewCycle {
    pub sequence: u64,
    pub source_text: String,
    pub handle: Option<HandleId>,
    pub rendered_ok: bool,
    pub runtime_error: Option<RuntimeError>,
    /// Milliseconds from submission until the stability wait ended.
    pub stable_after_ms: Option<u64>,
}

struct Active {
    cycle: PreviewCycle,
    handle: Option<Arc<RenderHandle>>,
    started: Instant,
}

struct Shared {
    config: Arc<PreviewConfig>,
    contexts: ContextManager,
    runner: AuditRunner,
    assets: Arc<AssetCache>,
    sequence: AtomicU64,
    active: Mutex<Option<Active>>,
    state: watch::Sender<PreviewState>,
}

impl Shared {
    fn active(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_handle(&self) -> Option<Arc<RenderHandle>> {
        self.active().as_ref().and_then(|a| a.handle.clone())
    }

    /// Applies `update` only while `id` is the current handle. Returns whether it applied.
    fn apply(&self, id: HandleId, update: impl FnOnce(&mut Active, &mut PreviewState)) -> bool {
        let mut active = self.active();
        let Some(current) = active.as_mut().filter(|a| a.cycle.handle == Some(id)) else {
            debug!(handle = %id, "dropping result for a superseded render context");
            return false;
        };
        self.state.send_modify(|state| update(current, state));
        true
    }

    fn error_sink(self: &Arc<Self>, id: HandleId) -> ErrorSink {
        let shared: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |error: RuntimeError| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.apply(id, |active, state| {
                active.cycle.runtime_error = Some(error.clone());
                state.runtime_error = Some(error);
                state.render = RenderPhase::RuntimeError;
            });
        })
    }

    async fn analyse(self: Arc<Self>, handle: Arc<RenderHandle>) {
        let id = handle.id();
        let report = stability::wait_for_stable(&handle, &self.assets, &self.config).await;

        let proceed = self.apply(id, |active, state| {
            active.cycle.rendered_ok = true;
            active.cycle.stable_after_ms = Some(active.started.elapsed().as_millis() as u64);
            state.is_loading = false;
            if state.render == RenderPhase::Loading {
                state.render = RenderPhase::Ready;
            }
            state.audit = AuditPhase::Auditing;
            state.stability = Some(report);
        });
        if !proceed {
            return;
        }

        let (snapshot, audit) = tokio::join!(
            snapshot::extract(&handle, self.config.snapshot_cap),
            self.runner.audit(&handle),
        );

        self.apply(id, |_, state| {
            match snapshot {
                Ok(nodes) => state.snapshot = nodes,
                Err(err) => debug!(handle = %id, error = %err, "snapshot unavailable"),
            }
            match audit {
                Ok(issues) => {
                    info!(handle = %id, issues = issues.len(), "analysis complete");
                    state.issues = issues;
                    state.analysis_error = None;
                    state.audit = AuditPhase::IssuesReady;
                }
                Err(err) => {
                    warn!(handle = %id, error = %err, "accessibility analysis failed");
                    state.issues.clear();
                    state.analysis_error = Some(err.to_string());
                    state.audit = AuditPhase::AuditError;
                }
            }
        });
    }
}

/// A preview pane: owns at most one live render context and publishes [`PreviewState`].
pub struct PreviewSession {
    shared: Arc<Shared>,
    swap: tokio::sync::Mutex<()>,
}

impl PreviewSession {
    pub fn new(config: PreviewConfig) -> Self {
        let runner = AuditRunner::new(&config);
        let loader = Arc::new(HttpImageLoader::new(config.stability_ceiling()));
        Self::with_parts(config, runner, loader)
    }

    pub fn with_parts(
        config: PreviewConfig,
        runner: AuditRunner,
        loader: Arc<dyn ImageLoader>,
    ) -> Self {
        let config = Arc::new(config);
        let (state, _) = watch::channel(PreviewState::idle());
        Self {
            shared: Arc::new(Shared {
                contexts: ContextManager::new(Arc::clone(&config)),
                config,
                runner,
                assets: Arc::new(AssetCache::new(loader)),
                sequence: AtomicU64::new(0),
                active: Mutex::new(None),
                state,
            }),
            swap: tokio::sync::Mutex::new(()),
        }
    }

    /// Renders `code` in a fresh context, replacing the current one. Returns the cycle
    /// number once the context is mounted; analysis continues in the background.
    pub async fn submit(&self, code: &str, assets: &[Asset]) -> u64 {
        let _swap = self.swap.lock().await;
        let shared = &self.shared;
        let sequence = shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        if !assets.is_empty() {
            shared.assets.preload(assets);
        }

        let id = HandleId::new();
        let previous = shared.active().replace(Active {
            cycle: PreviewCycle {
                sequence,
                source_text: code.to_string(),
                handle: Some(id),
                rendered_ok: false,
                runtime_error: None,
                stable_after_ms: None,
            },
            handle: None,
            started: Instant::now(),
        });
        shared.state.send_replace(PreviewState::loading(sequence));
        if let Some(handle) = previous.and_then(|p| p.handle) {
            shared.contexts.unmount(&handle);
        }

        let markup = normalize(code);
        debug!(cycle = sequence, handle = %id, bytes = markup.len(), "mounting render context");

        match shared.contexts.mount(id, &markup, shared.error_sink(id)).await {
            Ok(handle) => {
                if let Some(active) = shared.active().as_mut() {
                    active.handle = Some(Arc::clone(&handle));
                }
                tokio::spawn(Arc::clone(shared).analyse(handle));
            }
            Err(err) => {
                warn!(cycle = sequence, error = %err, "render context unavailable");
                let error = RuntimeError::render_access(&err);
                shared.apply(id, |active, state| {
                    active.cycle.runtime_error = Some(error.clone());
                    state.render = RenderPhase::RuntimeError;
                    state.is_loading = false;
                    state.runtime_error = Some(error);
                    state.audit = AuditPhase::Skipped;
                });
            }
        }
        sequence
    }

    pub fn state(&self) -> PreviewState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreviewState> {
        self.shared.state.subscribe()
    }

    /// Waits until the current cycle has nothing left in flight.
    pub async fn settled(&self) -> PreviewState {
        let mut updates = self.shared.state.subscribe();
        let settled = updates
            .wait_for(PreviewState::is_settled)
            .await
            .map(|state| PreviewState::clone(&state));
        settled.unwrap_or_else(|_| self.state())
    }

    pub fn current_cycle(&self) -> Option<PreviewCycle> {
        self.shared.active().as_ref().map(|a| a.cycle.clone())
    }

    pub async fn highlight_by_selector(&self, selector: &str) -> HighlightOutcome {
        match self.shared.current_handle() {
            Some(handle) => highlight::highlight(&handle, selector).await,
            None => HighlightOutcome::Missed,
        }
    }

    pub async fn scroll_target(&self) -> Option<String> {
        let handle = self.shared.current_handle()?;
        handle.scroll_target().await.ok().flatten()
    }

    /// Dispatches a click in the current context. Errors raised by the handler surface in
    /// [`PreviewState::runtime_error`].
    pub async fn click(&self, selector: &str) -> ClickReport {
        let Some(handle) = self.shared.current_handle() else {
            return ClickReport::from(ClickOutcome::Missed);
        };
        handle
            .click(selector)
            .await
            .unwrap_or_else(|_| ClickReport::from(ClickOutcome::Missed))
    }

    pub async fn rendered_html(&self) -> Option<String> {
        let handle = self.shared.current_handle()?;
        handle.rendered_html().await.ok()
    }

    pub fn live_contexts(&self) -> usize {
        self.shared.contexts.live_count()
    }

    pub fn lifecycle(&self) -> Vec<LifecycleEvent> {
        self.shared.contexts.lifecycle()
    }

    /// Unmounts the current context. Results still in flight are dropped.
    pub async fn shutdown(&self) {
        let _swap = self.swap.lock().await;
        let previous = self.shared.active().take();
        if let Some(handle) = previous.and_then(|p| p.handle) {
            self.shared.contexts.unmount(&handle);
        }
        self.shared.state.send_modify(|state| {
            state.is_loading = false;
            if state.audit == AuditPhase::Auditing {
                state.audit = AuditPhase::Idle;
            }
            state.render = RenderPhase::Idle;
        });
    }
}
