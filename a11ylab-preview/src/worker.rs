//! The thread behind a [`RenderHandle`](crate::context::RenderHandle).
//!
//! It owns the parsed document, its marker overlay and the Luau sandbox, none of which are
//! `Send`. Jobs arrive on a channel and are answered on per-job oneshot replies; the thread
//! exits once every sender is gone.

use crate::audit::{self, AuditIssue, EngineProbe};
use crate::config::PreviewConfig;
use crate::context::{ClickOutcome, ClickReport, ListenerRegistry, LoadReport};
use crate::dom::DomIndex;
use crate::error::{AuditError, RenderError, RuntimeError, RuntimeErrorKind};
use crate::highlight::{self, HighlightOutcome, Marker};
use crate::sandbox::Sandbox;
use crate::snapshot::{self, AccessibleNode};
use a11ylab_markup::{resolve, selector_for, serialize, NodeId, Overlay};
use scraper::{ElementRef, Html, Selector};
use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Script types executed by the sandbox. Anything else is inert markup.
const SCRIPT_TYPES: &[&str] = &["text/luau", "text/lua", "application/luau", "application/lua"];

pub(crate) enum Job {
    /// One animation frame: deferred callbacks that are due run here.
    Frame {
        reply: oneshot::Sender<()>,
    },
    ImageSources {
        reply: oneshot::Sender<Vec<String>>,
    },
    Snapshot {
        cap: usize,
        reply: oneshot::Sender<Vec<AccessibleNode>>,
    },
    ProbeEngine {
        reply: oneshot::Sender<EngineProbe>,
    },
    InjectEngine {
        source: String,
        chunk: String,
        deadline: Instant,
        reply: oneshot::Sender<Result<(), String>>,
    },
    RunEngine {
        tags: Vec<String>,
        deadline: Instant,
        timeout_ms: u64,
        reply: oneshot::Sender<Result<Vec<AuditIssue>, AuditError>>,
    },
    ClearMarks {
        marker: Marker,
        reply: oneshot::Sender<usize>,
    },
    MarkViolations {
        selectors: Vec<String>,
        cap: usize,
        reply: oneshot::Sender<usize>,
    },
    Highlight {
        selector: String,
        reply: oneshot::Sender<HighlightOutcome>,
    },
    ScrollTarget {
        reply: oneshot::Sender<Option<String>>,
    },
    Click {
        selector: String,
        reply: oneshot::Sender<ClickReport>,
    },
    Serialize {
        reply: oneshot::Sender<String>,
    },
}

fn script_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("script").unwrap())
}

fn image_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("img[src]").unwrap())
}

/// Thread entry point. Reports the load outcome on `loaded`, then serves jobs.
pub(crate) fn run(
    page: String,
    config: Arc<PreviewConfig>,
    listeners: Arc<ListenerRegistry>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    loaded: oneshot::Sender<Result<LoadReport, RenderError>>,
) {
    let mut context = match DocumentContext::load(&page, &config, listeners) {
        Ok((context, report)) => {
            let _ = loaded.send(Ok(report));
            context
        }
        Err(err) => {
            let _ = loaded.send(Err(err));
            return;
        }
    };

    while let Some(job) = jobs.blocking_recv() {
        context.handle(job);
    }
    debug!("render context worker exiting");
}

struct DocumentContext {
    dom: Rc<DomIndex>,
    sandbox: Sandbox,
    overlay: Overlay,
    scroll_target: Option<NodeId>,
    listeners: Arc<ListenerRegistry>,
    handler_timeout: Duration,
}

impl DocumentContext {
    fn load(
        page: &str,
        config: &PreviewConfig,
        listeners: Arc<ListenerRegistry>,
    ) -> Result<(Self, LoadReport), RenderError> {
        let html = Html::parse_document(page);
        let mut report = LoadReport {
            parse_errors: html.errors.len(),
            ..LoadReport::default()
        };
        let dom = Rc::new(DomIndex::new(html));
        let sandbox = Sandbox::new(Rc::clone(&dom), config.script_memory_limit_bytes)
            .map_err(|e| RenderError::Access(format!("script runtime unavailable: {}", e)))?;

        let context = Self {
            dom,
            sandbox,
            overlay: Overlay::default(),
            scroll_target: None,
            listeners,
            handler_timeout: config.handler_timeout(),
        };

        for (n, source) in context.inline_scripts().iter().enumerate() {
            report.scripts_run += 1;
            let chunk = format!("=script[{}]", n + 1);
            if let Err(err) = context.sandbox.exec(source, &chunk, context.handler_timeout) {
                report.script_errors += 1;
                context.report(RuntimeError::from_lua(RuntimeErrorKind::Uncaught, &err));
            }
        }
        report.dialogs = context.sandbox.take_dialogs();
        Ok((context, report))
    }

    fn inline_scripts(&self) -> Vec<String> {
        self.dom
            .html
            .select(script_selector())
            .filter_map(|script| {
                let kind = script
                    .value()
                    .attr("type")
                    .map(|t| t.trim().to_ascii_lowercase())
                    .unwrap_or_default();
                if SCRIPT_TYPES.contains(&kind.as_str()) {
                    Some(script.text().collect::<String>())
                } else {
                    debug!(script_type = %kind, "skipping script the sandbox cannot run");
                    None
                }
            })
            .collect()
    }

    fn report(&self, error: RuntimeError) {
        warn!(kind = ?error.kind, message = %error.message, "runtime error in rendered content");
        self.listeners.dispatch(&error);
    }

    fn run_due_timers(&self) {
        match self.sandbox.run_due_timers(self.handler_timeout) {
            Ok(failures) => {
                for message in failures {
                    self.report(RuntimeError::new(RuntimeErrorKind::UnhandledRejection, message));
                }
            }
            Err(err) => self.report(RuntimeError::from_lua(
                RuntimeErrorKind::UnhandledRejection,
                &err,
            )),
        }
    }

    fn handle(&mut self, job: Job) {
        match job {
            Job::Frame { reply } => {
                self.run_due_timers();
                let _ = reply.send(());
            }
            Job::ImageSources { reply } => {
                let sources = self
                    .dom
                    .html
                    .select(image_selector())
                    .filter_map(|img| img.value().attr("src"))
                    .map(str::to_string)
                    .collect();
                let _ = reply.send(sources);
            }
            Job::Snapshot { cap, reply } => {
                let _ = reply.send(snapshot::collect(&self.dom.html, cap));
            }
            Job::ProbeEngine { reply } => {
                let _ = reply.send(audit::probe(self.sandbox.lua()));
            }
            Job::InjectEngine {
                source,
                chunk,
                deadline,
                reply,
            } => {
                let _ = reply.send(audit::inject(&self.sandbox, &source, &chunk, deadline));
            }
            Job::RunEngine {
                tags,
                deadline,
                timeout_ms,
                reply,
            } => {
                let _ = reply.send(audit::run_engine(&self.sandbox, &tags, deadline, timeout_ms));
            }
            Job::ClearMarks { marker, reply } => {
                if marker == Marker::Focus {
                    self.scroll_target = None;
                }
                let _ = reply.send(highlight::clear(&mut self.overlay, marker));
            }
            Job::MarkViolations {
                selectors,
                cap,
                reply,
            } => {
                let marked =
                    highlight::apply_violations(&self.dom.html, &mut self.overlay, &selectors, cap);
                let _ = reply.send(marked);
            }
            Job::Highlight { selector, reply } => {
                let (outcome, target) =
                    highlight::apply_focus(&self.dom.html, &mut self.overlay, &selector);
                self.scroll_target = target;
                let _ = reply.send(outcome);
            }
            Job::ScrollTarget { reply } => {
                let selector = self
                    .scroll_target
                    .and_then(|id| self.dom.html.tree.get(id))
                    .and_then(ElementRef::wrap)
                    .map(|e| selector_for(&self.dom.html, e));
                let _ = reply.send(selector);
            }
            Job::Click { selector, reply } => {
                let _ = reply.send(self.click(&selector));
            }
            Job::Serialize { reply } => {
                let _ = reply.send(serialize(&self.dom.html, &self.overlay));
            }
        }
    }

    /// Dispatches a click: runs the element's inline `onclick` source, then any callbacks it
    /// scheduled with a zero delay.
    fn click(&self, selector: &str) -> ClickReport {
        let Some(element) = resolve(&self.dom.html, selector) else {
            return ClickReport::from(ClickOutcome::Missed);
        };
        if element.value().attr("disabled").is_some() {
            return ClickReport::from(ClickOutcome::Disabled);
        }
        let Some(handler) = element.value().attr("onclick").map(str::to_string) else {
            return ClickReport::from(ClickOutcome::NoHandler);
        };

        let target = self.dom.index_of(element.id());
        let outcome = match self
            .sandbox
            .set_event("click", target)
            .and_then(|_| self.sandbox.exec(&handler, "=onclick", self.handler_timeout))
        {
            Ok(()) => ClickOutcome::Handled,
            Err(err) => {
                self.report(RuntimeError::from_lua(RuntimeErrorKind::Uncaught, &err));
                ClickOutcome::Threw
            }
        };
        self.run_due_timers();

        ClickReport {
            outcome,
            dialogs: self.sandbox.take_dialogs(),
        }
    }
}
