//! Isolated render contexts: creation, job dispatch and teardown.
//!
//! Each mount spawns a dedicated worker thread that owns the document. Runtime errors raised
//! inside it are fanned out through a [`ListenerRegistry`]; unmounting clears the registry
//! before the job channel is dropped, so a torn-down context can no longer report anything.

use crate::config::PreviewConfig;
use crate::error::{RenderError, RuntimeError, RuntimeErrorKind};
use crate::queue::RunQueue;
use crate::worker::{self, Job};
use a11ylab_markup::build_shell;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HandleId(Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

/// Receives runtime errors raised inside a context. Called from the context's thread.
pub type ErrorSink = Arc<dyn Fn(RuntimeError) + Send + Sync>;

type Listener = Box<dyn Fn(&RuntimeError) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next: AtomicU64,
    listeners: DashMap<u64, (RuntimeErrorKind, Listener)>,
}

impl ListenerRegistry {
    pub fn add(&self, kind: RuntimeErrorKind, listener: Listener) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, (kind, listener));
        id
    }

    pub fn dispatch(&self, error: &RuntimeError) {
        for entry in self.listeners.iter() {
            let (kind, listener) = entry.value();
            if *kind == error.kind {
                listener(error);
            }
        }
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub parse_errors: usize,
    pub scripts_run: usize,
    pub script_errors: usize,
    /// Messages passed to `alert` while scripts ran during load.
    pub dialogs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickOutcome {
    Handled,
    /// The handler raised; the error went to the context's listeners.
    Threw,
    NoHandler,
    Disabled,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClickReport {
    pub outcome: ClickOutcome,
    pub dialogs: Vec<String>,
}

impl From<ClickOutcome> for ClickReport {
    fn from(outcome: ClickOutcome) -> Self {
        Self {
            outcome,
            dialogs: Vec::new(),
        }
    }
}

/// A live render context. Cloning the `Arc` shares it; [`ContextManager::unmount`] ends it.
pub struct RenderHandle {
    id: HandleId,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    listeners: Arc<ListenerRegistry>,
    audit_queue: RunQueue,
    load: LoadReport,
    closed: AtomicBool,
}

impl RenderHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load
    }

    pub(crate) fn audit_queue(&self) -> &RunQueue {
        &self.audit_queue
    }

    /// Sends a job built around a fresh reply channel and waits for the answer.
    pub(crate) async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Job,
    ) -> Result<T, RenderError> {
        let (reply, answer) = oneshot::channel();
        {
            let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            let sender = jobs.as_ref().ok_or(RenderError::Closed)?;
            sender.send(build(reply)).map_err(|_| RenderError::Closed)?;
        }
        answer.await.map_err(|_| RenderError::Closed)
    }

    /// Ticks one animation frame.
    pub async fn frame(&self) -> Result<(), RenderError> {
        self.request(|reply| Job::Frame { reply }).await
    }

    /// The document as currently rendered, markers included.
    pub async fn rendered_html(&self) -> Result<String, RenderError> {
        self.request(|reply| Job::Serialize { reply }).await
    }

    pub async fn click(&self, selector: &str) -> Result<ClickReport, RenderError> {
        self.request(|reply| Job::Click {
            selector: selector.to_string(),
            reply,
        })
        .await
    }

    /// Selector of the element last scrolled into view by a highlight.
    pub async fn scroll_target(&self) -> Result<Option<String>, RenderError> {
        self.request(|reply| Job::ScrollTarget { reply }).await
    }

    /// Returns `true` if this call closed the handle.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.listeners.clear();
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "handle", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Mounted(HandleId),
    Unmounted(HandleId),
}

/// Creates and tears down render contexts, keeping a count and an ordered lifecycle log.
pub struct ContextManager {
    config: Arc<PreviewConfig>,
    live: AtomicUsize,
    lifecycle: Mutex<Vec<LifecycleEvent>>,
}

impl ContextManager {
    pub fn new(config: Arc<PreviewConfig>) -> Self {
        Self {
            config,
            live: AtomicUsize::new(0),
            lifecycle: Mutex::new(Vec::new()),
        }
    }

    /// Builds the document shell around `markup`, loads it into a new context and registers
    /// `sink` for uncaught errors and unhandled rejections.
    pub async fn mount(
        &self,
        id: HandleId,
        markup: &str,
        sink: ErrorSink,
    ) -> Result<Arc<RenderHandle>, RenderError> {
        let listeners = Arc::new(ListenerRegistry::default());
        let uncaught = Arc::clone(&sink);
        listeners.add(
            RuntimeErrorKind::Uncaught,
            Box::new(move |error| uncaught(error.clone())),
        );
        listeners.add(
            RuntimeErrorKind::UnhandledRejection,
            Box::new(move |error| sink(error.clone())),
        );

        let page = build_shell(markup, &self.config.shell_options());
        let (jobs, inbox) = mpsc::unbounded_channel();
        let (loaded, load_result) = oneshot::channel();
        let worker_config = Arc::clone(&self.config);
        let worker_listeners = Arc::clone(&listeners);

        thread::Builder::new()
            .name(format!("render-{}", id))
            .spawn(move || worker::run(page, worker_config, worker_listeners, inbox, loaded))
            .map_err(|e| RenderError::Access(format!("failed to start context worker: {}", e)))?;

        let load = match load_result.await {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(RenderError::Access(
                    "context worker exited before the document loaded".to_string(),
                ))
            }
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        self.log(LifecycleEvent::Mounted(id));
        info!(
            handle = %id,
            scripts = load.scripts_run,
            script_errors = load.script_errors,
            "render context mounted"
        );

        Ok(Arc::new(RenderHandle {
            id,
            jobs: Mutex::new(Some(jobs)),
            listeners,
            audit_queue: RunQueue::default(),
            load,
            closed: AtomicBool::new(false),
        }))
    }

    /// Detaches listeners and ends the context. Safe to call more than once.
    pub fn unmount(&self, handle: &RenderHandle) {
        if handle.close() {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.log(LifecycleEvent::Unmounted(handle.id()));
            debug!(handle = %handle.id(), "render context unmounted");
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> Vec<LifecycleEvent> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn log(&self, event: LifecycleEvent) {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recording_sink() -> (ErrorSink, Arc<StdMutex<Vec<RuntimeError>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ErrorSink = Arc::new(move |error| sink_seen.lock().unwrap().push(error));
        (sink, seen)
    }

    #[tokio::test]
    async fn test_load_time_script_errors_reach_the_sink() {
        let manager = ContextManager::new(Arc::new(PreviewConfig::default()));
        let (sink, seen) = recording_sink();
        let handle = manager
            .mount(
                HandleId::new(),
                r#"<p>hi</p><script type="text/luau">error("load boom")</script>"#,
                sink,
            )
            .await
            .unwrap();

        assert_eq!(handle.load_report().scripts_run, 1);
        assert_eq!(handle.load_report().script_errors, 1);
        let errors = seen.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, RuntimeErrorKind::Uncaught);
        assert!(errors[0].message.contains("load boom"));
        manager.unmount(&handle);
    }

    #[tokio::test]
    async fn test_unmount_detaches_listeners_and_closes_the_channel() {
        let manager = ContextManager::new(Arc::new(PreviewConfig::default()));
        let (sink, _) = recording_sink();
        let id = HandleId::new();
        let handle = manager.mount(id, "<p>x</p>", sink).await.unwrap();
        assert_eq!(handle.listener_count(), 2);
        assert_eq!(manager.live_count(), 1);

        manager.unmount(&handle);
        manager.unmount(&handle);
        assert_eq!(handle.listener_count(), 0);
        assert_eq!(manager.live_count(), 0);
        assert_eq!(handle.frame().await, Err(RenderError::Closed));
        assert_eq!(
            manager.lifecycle(),
            vec![LifecycleEvent::Mounted(id), LifecycleEvent::Unmounted(id)]
        );
    }

    #[tokio::test]
    async fn test_non_luau_scripts_are_inert() {
        let manager = ContextManager::new(Arc::new(PreviewConfig::default()));
        let (sink, seen) = recording_sink();
        let handle = manager
            .mount(
                HandleId::new(),
                r#"<script>document.body.innerHTML = ""</script><script type="text/lua">alert("hi")</script>"#,
                sink,
            )
            .await
            .unwrap();
        assert_eq!(handle.load_report().scripts_run, 1);
        assert_eq!(handle.load_report().dialogs, vec!["hi".to_string()]);
        assert!(seen.lock().unwrap().is_empty());
        manager.unmount(&handle);
    }
}
