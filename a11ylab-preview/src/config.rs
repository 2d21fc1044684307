//! Preview engine configuration, loadable from YAML. Every field has a default.

use crate::error::ConfigError;
use a11ylab_markup::ShellOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Rule tags audited by default: WCAG 2.0 and 2.1, levels A and AA.
pub const DEFAULT_RULE_TAGS: &[&str] = &["wcag2a", "wcag2aa", "wcag21a", "wcag21aa"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Ceiling on waiting for images after the frame ticks.
    pub stability_ceiling_ms: u64,
    /// Frame ticks before image checks. Values below 2 are raised to 2.
    pub animation_frames: u32,
    pub audit_timeout_ms: u64,
    /// Maximum candidate nodes considered by the snapshot.
    pub snapshot_cap: usize,
    /// Maximum nodes carrying the violation marker after an audit.
    pub violation_mark_cap: usize,
    pub rule_tags: Vec<String>,
    /// Where to fetch the rule engine from when the bundled source fails to evaluate.
    pub fallback_engine_url: Option<String>,
    /// Luau heap limit per render context.
    pub script_memory_limit_bytes: usize,
    /// Time budget for one script, handler or deferred-task batch.
    pub handler_timeout_ms: u64,
    pub document_lang: String,
    pub document_title: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            stability_ceiling_ms: 1_500,
            animation_frames: 2,
            audit_timeout_ms: 10_000,
            snapshot_cap: 200,
            violation_mark_cap: 40,
            rule_tags: DEFAULT_RULE_TAGS.iter().map(|t| t.to_string()).collect(),
            fallback_engine_url: None,
            script_memory_limit_bytes: 4 * 1024 * 1024,
            handler_timeout_ms: 200,
            document_lang: "ko".to_string(),
            document_title: "Preview".to_string(),
        }
    }
}

impl PreviewConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ceilings = [
            ("stability_ceiling_ms", self.stability_ceiling_ms),
            ("audit_timeout_ms", self.audit_timeout_ms),
            ("handler_timeout_ms", self.handler_timeout_ms),
        ];
        for (field, value) in ceilings {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.snapshot_cap == 0 {
            return Err(ConfigError::Invalid {
                field: "snapshot_cap",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.script_memory_limit_bytes < 64 * 1024 {
            return Err(ConfigError::Invalid {
                field: "script_memory_limit_bytes",
                reason: "must be at least 64 KiB".to_string(),
            });
        }
        if let Some(url) = &self.fallback_engine_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "fallback_engine_url",
                    reason: format!("'{}' is not an http(s) URL", url),
                });
            }
        }
        Ok(())
    }

    pub fn stability_ceiling(&self) -> Duration {
        Duration::from_millis(self.stability_ceiling_ms)
    }

    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn shell_options(&self) -> ShellOptions<'_> {
        ShellOptions {
            lang: &self.document_lang,
            title: &self.document_title,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(PreviewConfig::from_yaml_str("").unwrap(), PreviewConfig::default());
    }

    #[test]
    fn test_preview_document_is_korean_by_default() {
        let config = PreviewConfig::default();
        assert_eq!(config.document_lang, "ko");
        assert_eq!(config.shell_options().lang, "ko");
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let config = PreviewConfig::from_yaml_str(
            "audit_timeout_ms: 2500\ndocument_lang: en\nrule_tags: [wcag2a]\n",
        )
        .unwrap();
        assert_eq!(config.audit_timeout(), Duration::from_millis(2500));
        assert_eq!(config.document_lang, "en");
        assert_eq!(config.rule_tags, vec!["wcag2a"]);
        assert_eq!(config.snapshot_cap, 200);
        assert_eq!(config.violation_mark_cap, 40);
    }

    #[test]
    fn test_rejects_zero_ceilings() {
        let err = PreviewConfig::from_yaml_str("stability_ceiling_ms: 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "stability_ceiling_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_non_http_fallback() {
        let err = PreviewConfig::from_yaml_str("fallback_engine_url: file:///tmp/axle.luau")
            .unwrap_err();
        assert!(err.to_string().contains("fallback_engine_url"));
    }

    #[test]
    fn test_rejects_unknown_types() {
        assert!(matches!(
            PreviewConfig::from_yaml_str("snapshot_cap: lots"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
