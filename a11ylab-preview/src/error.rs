use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Cannot obtain isolated render context: {0}")]
    Access(String),

    #[error("Render context was torn down")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("Audit engine injection failed: {0}")]
    Injection(String),

    #[error("Audit engine loaded but '{api}' is not available")]
    MissingApi { api: String },

    #[error("Accessibility analysis timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Audit engine failed: {0}")]
    Engine(String),

    #[error("Render context was torn down before the audit finished")]
    ContextClosed,
}

impl From<RenderError> for AuditError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Closed => AuditError::ContextClosed,
            RenderError::Access(reason) => AuditError::Engine(reason),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeErrorKind {
    /// A script or inline handler raised.
    Uncaught,
    /// A deferred task (`set_timeout` callback) raised after its caller returned.
    UnhandledRejection,
    /// The isolated context could not be created at all.
    RenderAccess,
}

/// An error raised by the rendered content, surfaced to the caller instead of propagating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
        }
    }

    /// Splits an `mlua` error into its first line and the traceback that follows.
    pub fn from_lua(kind: RuntimeErrorKind, err: &mlua::Error) -> Self {
        let text = err.to_string();
        let mut lines = text.lines();
        let message = lines
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("script error")
            .to_string();
        let rest: Vec<&str> = lines.collect();
        Self {
            kind,
            message,
            stack: (!rest.is_empty()).then(|| rest.join("\n")),
        }
    }

    pub fn render_access(err: &RenderError) -> Self {
        Self::new(RuntimeErrorKind::RenderAccess, err.to_string())
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
