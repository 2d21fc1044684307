//! Accessibility audits with the `axle` rule engine, run inside the render context.
//!
//! Audit flow per request, serialized per context through its run queue:
//! 1. clear violation and focus markers left by a previous audit
//! 2. make sure `axle.run` exists: evaluate the bundled engine, and if that fails fetch the
//!    fallback source and evaluate it
//! 3. run the rules for the configured tags and walk the returned violations
//! 4. mark affected nodes, up to the configured cap
//!
//! The whole flow is bounded by the audit timeout; the engine call is also bounded inside
//! the sandbox so a runaway rule cannot hold the context thread.

use crate::config::PreviewConfig;
use crate::context::RenderHandle;
use crate::error::AuditError;
use crate::highlight::{self, Marker};
use crate::sandbox::{Sandbox, BUDGET_EXCEEDED};
use crate::worker::Job;
use async_trait::async_trait;
use mlua::{Function, Lua, Table, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const ENGINE_GLOBAL: &str = "axle";
pub const ENGINE_ENTRY: &str = "run";

/// The engine shipped with the crate.
pub const BUNDLED_ENGINE: &str = include_str!("../assets/axle.luau");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Serious,
    Critical,
}

impl Severity {
    /// Unknown or missing impacts count as moderate.
    pub fn parse(impact: Option<&str>) -> Self {
        match impact.map(str::to_ascii_lowercase).as_deref() {
            Some("minor") => Severity::Minor,
            Some("serious") => Severity::Serious,
            Some("critical") => Severity::Critical,
            _ => Severity::Moderate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedNode {
    pub selector: String,
    pub matched_html: String,
    pub failure_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditIssue {
    pub rule_id: String,
    pub severity: Severity,
    pub help_text: String,
    pub help_url: Option<String>,
    pub tags: Vec<String>,
    pub affected_nodes: Vec<AffectedNode>,
}

/// Fetches engine source text for the fallback injection path.
#[async_trait]
pub trait EngineFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, String>;
}

pub struct HttpEngineFetcher {
    client: reqwest::Client,
}

impl HttpEngineFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl EngineFetcher for HttpEngineFetcher {
    async fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        response.text().await.map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct EngineSource {
    /// Evaluated first. `None` goes straight to the fallback.
    pub primary: Option<String>,
    pub fallback_url: Option<String>,
}

impl EngineSource {
    pub fn bundled(fallback_url: Option<String>) -> Self {
        Self {
            primary: Some(BUNDLED_ENGINE.to_string()),
            fallback_url,
        }
    }
}

pub struct AuditRunner {
    source: EngineSource,
    fetcher: Arc<dyn EngineFetcher>,
    timeout: Duration,
    tags: Vec<String>,
    mark_cap: usize,
}

impl AuditRunner {
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            source: EngineSource::bundled(config.fallback_engine_url.clone()),
            fetcher: Arc::new(HttpEngineFetcher::new(config.audit_timeout())),
            timeout: config.audit_timeout(),
            tags: config.rule_tags.clone(),
            mark_cap: config.violation_mark_cap,
        }
    }

    pub fn with_engine(mut self, source: EngineSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn EngineFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Audits the context behind `handle`. Requests on the same handle run one at a time.
    pub async fn audit(&self, handle: &RenderHandle) -> Result<Vec<AuditIssue>, AuditError> {
        let timeout_ms = self.timeout.as_millis() as u64;
        handle
            .audit_queue()
            .run(async {
                match tokio::time::timeout(self.timeout, self.audit_now(handle)).await {
                    Ok(result) => result,
                    Err(_) => Err(AuditError::Timeout { timeout_ms }),
                }
            })
            .await
    }

    async fn audit_now(&self, handle: &RenderHandle) -> Result<Vec<AuditIssue>, AuditError> {
        let deadline = Instant::now() + self.timeout;

        highlight::clear_marks(handle, Marker::Violation).await?;
        highlight::clear_marks(handle, Marker::Focus).await?;
        self.ensure_injected(handle, deadline).await?;

        let issues = handle
            .request(|reply| Job::RunEngine {
                tags: self.tags.clone(),
                deadline,
                timeout_ms: self.timeout.as_millis() as u64,
                reply,
            })
            .await??;

        let marked = highlight::mark_violations(handle, &issues, self.mark_cap).await?;
        info!(
            handle = %handle.id(),
            issues = issues.len(),
            marked,
            "accessibility audit finished"
        );
        Ok(issues)
    }

    async fn ensure_injected(
        &self,
        handle: &RenderHandle,
        deadline: Instant,
    ) -> Result<(), AuditError> {
        if probe_handle(handle).await? == EngineProbe::Ready {
            return Ok(());
        }

        let direct = match &self.source.primary {
            Some(source) => inject_into(handle, source.clone(), "=axle", deadline).await?,
            None => Err("no bundled engine source".to_string()),
        };

        if let Err(direct_error) = direct {
            warn!(handle = %handle.id(), error = %direct_error, "bundled engine failed to evaluate");
            let Some(url) = &self.source.fallback_url else {
                return Err(AuditError::Injection(format!(
                    "direct evaluation failed ({}); no fallback source configured",
                    direct_error
                )));
            };
            let fetched = self.fetcher.fetch(url).await.map_err(|e| {
                AuditError::Injection(format!(
                    "direct evaluation failed ({}); fetching {} failed ({})",
                    direct_error, url, e
                ))
            })?;
            debug!(handle = %handle.id(), url = %url, bytes = fetched.len(), "fetched fallback engine");
            inject_into(handle, fetched, &format!("={}", url), deadline)
                .await?
                .map_err(|e| {
                    AuditError::Injection(format!(
                        "direct evaluation failed ({}); fallback evaluation failed ({})",
                        direct_error, e
                    ))
                })?;
        }

        match probe_handle(handle).await? {
            EngineProbe::Ready => Ok(()),
            EngineProbe::Missing | EngineProbe::Incomplete => Err(AuditError::MissingApi {
                api: format!("{}.{}", ENGINE_GLOBAL, ENGINE_ENTRY),
            }),
        }
    }
}

async fn probe_handle(handle: &RenderHandle) -> Result<EngineProbe, AuditError> {
    Ok(handle.request(|reply| Job::ProbeEngine { reply }).await?)
}

async fn inject_into(
    handle: &RenderHandle,
    source: String,
    chunk: &str,
    deadline: Instant,
) -> Result<Result<(), String>, AuditError> {
    Ok(handle
        .request(|reply| Job::InjectEngine {
            source,
            chunk: chunk.to_string(),
            deadline,
            reply,
        })
        .await?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineProbe {
    Missing,
    /// The global exists but has no callable entry point.
    Incomplete,
    Ready,
}

pub(crate) fn probe(lua: &Lua) -> EngineProbe {
    match lua.globals().get::<Value>(ENGINE_GLOBAL) {
        Ok(Value::Table(engine)) => match engine.get::<Value>(ENGINE_ENTRY) {
            Ok(Value::Function(_)) => EngineProbe::Ready,
            _ => EngineProbe::Incomplete,
        },
        Ok(Value::Nil) | Err(_) => EngineProbe::Missing,
        Ok(_) => EngineProbe::Incomplete,
    }
}

fn exposes_entry(value: &Value) -> bool {
    match value {
        Value::Table(table) => matches!(table.get::<Value>(ENGINE_ENTRY), Ok(Value::Function(_))),
        _ => false,
    }
}

/// Evaluates engine source in the context. Builds that return their module table or only
/// fill `module.exports` are published under the engine global. The `module`/`exports`
/// shim is only visible while the source evaluates; the document's own globals of those
/// names are restored afterwards.
pub(crate) fn inject(
    sandbox: &Sandbox,
    source: &str,
    chunk: &str,
    deadline: Instant,
) -> Result<(), String> {
    let globals = sandbox.lua().globals();
    let saved_module = globals.get::<Value>("module").unwrap_or(Value::Nil);
    let saved_exports = globals.get::<Value>("exports").unwrap_or(Value::Nil);

    let evaluated = sandbox.with_deadline(deadline, |lua| {
        let exports = lua.create_table()?;
        let module = lua.create_table()?;
        module.set("exports", exports.clone())?;
        lua.globals().set("module", module.clone())?;
        lua.globals().set("exports", exports)?;
        let returned = lua.load(source).set_name(chunk).eval::<Value>()?;
        let exported = module.get::<Value>("exports")?;
        Ok((returned, exported))
    });
    let restored = globals
        .set("module", saved_module)
        .and_then(|_| globals.set("exports", saved_exports));
    let (returned, exported) = evaluated.map_err(|e| first_line(&e))?;
    restored.map_err(|e| first_line(&e))?;

    if probe(sandbox.lua()) != EngineProbe::Missing {
        return Ok(());
    }
    for candidate in [returned, exported] {
        if exposes_entry(&candidate) {
            globals
                .set(ENGINE_GLOBAL, candidate)
                .map_err(|e| first_line(&e))?;
            break;
        }
    }
    Ok(())
}

fn first_line(err: &mlua::Error) -> String {
    err.to_string()
        .lines()
        .next()
        .unwrap_or("evaluation failed")
        .to_string()
}

pub(crate) fn run_engine(
    sandbox: &Sandbox,
    tags: &[String],
    deadline: Instant,
    timeout_ms: u64,
) -> Result<Vec<AuditIssue>, AuditError> {
    let result = sandbox.with_deadline(deadline, |lua| {
        let engine: Table = lua.globals().get(ENGINE_GLOBAL)?;
        let run: Function = engine.get(ENGINE_ENTRY)?;
        let options = lua.create_table()?;
        options.set("tags", lua.create_sequence_from(tags.iter().map(String::as_str))?)?;
        run.call::<Table>(options)
    });

    match result {
        Ok(violations) => parse_violations(&violations)
            .map_err(|e| AuditError::Engine(format!("malformed result: {}", first_line(&e)))),
        Err(err) if Instant::now() >= deadline || err.to_string().contains(BUDGET_EXCEEDED) => {
            Err(AuditError::Timeout { timeout_ms })
        }
        Err(err) => Err(AuditError::Engine(first_line(&err))),
    }
}

fn parse_violations(violations: &Table) -> mlua::Result<Vec<AuditIssue>> {
    let mut issues = Vec::new();
    for violation in violations.sequence_values::<Table>() {
        let violation = violation?;

        let mut affected_nodes = Vec::new();
        if let Some(nodes) = violation.get::<Option<Table>>("nodes")? {
            for node in nodes.sequence_values::<Table>() {
                let node = node?;
                affected_nodes.push(AffectedNode {
                    selector: node.get("target")?,
                    matched_html: node.get::<Option<String>>("html")?.unwrap_or_default(),
                    failure_summary: node.get("failureSummary")?,
                });
            }
        }

        let impact: Option<String> = violation.get("impact")?;
        issues.push(AuditIssue {
            rule_id: violation.get("id")?,
            severity: Severity::parse(impact.as_deref()),
            help_text: violation.get::<Option<String>>("help")?.unwrap_or_default(),
            help_url: violation.get("helpUrl")?,
            tags: violation.get::<Option<Vec<String>>>("tags")?.unwrap_or_default(),
            affected_nodes,
        });
    }
    Ok(issues)
}
