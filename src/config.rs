//! Configuration management for Turnstile.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Policy, PolicyPatch};

/// Environment variable prefix for [`GateConfig::load`].
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Configuration for a [`RateLimitGate`](crate::pipeline::RateLimitGate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Default requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Default window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,

    /// How requests are assigned to groups
    #[serde(default)]
    pub group_by: GroupBy,

    /// Static per-group overrides
    #[serde(default)]
    pub per_group: HashMap<String, PolicyPatch>,

    /// Fail denied requests with an error instead of a synthesized 429
    #[serde(default = "default_true")]
    pub throw_on_deny: bool,

    /// Detail text for synthesized 429 responses
    #[serde(default)]
    pub custom_deny_message: Option<String>,

    /// Learn policies from upstream rate limit headers
    #[serde(default = "default_true")]
    pub auto_negotiate: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            group_by: GroupBy::default(),
            per_group: HashMap::new(),
            throw_on_deny: true,
            custom_deny_message: None,
            auto_negotiate: true,
        }
    }
}

/// Built-in grouping strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// A single group for every request
    #[default]
    Global,
    /// One group per URL hostname
    Host,
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_seconds() -> f64 {
    60.0
}

fn default_true() -> bool {
    true
}

impl GateConfig {
    /// Configuration with the given default policy and every other field
    /// at its default.
    pub fn new(max_requests: u32, window_seconds: f64) -> Self {
        Self {
            max_requests,
            window_seconds,
            ..Self::default()
        }
    }

    /// The global default policy.
    pub fn policy(&self) -> Result<Policy> {
        Policy::new(self.max_requests, self.window_seconds)
    }

    /// Check the default policy and every per-group override.
    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        for (group, patch) in &self.per_group {
            patch.validate().map_err(|e| {
                TurnstileError::Config(format!("Invalid override for group '{group}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse gate config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading gate configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file, overlaid with
    /// `TURNSTILE_*` environment variables.
    ///
    /// The file format follows its extension (YAML, TOML, JSON).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading gate configuration");
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: GateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.max_requests, 60);
        assert_eq!(config.window_seconds, 60.0);
        assert_eq!(config.group_by, GroupBy::Global);
        assert!(config.throw_on_deny);
        assert!(config.auto_negotiate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
max_requests: 10
window_seconds: 1
group_by: host
throw_on_deny: false
custom_deny_message: "Slow down"
auto_negotiate: false
per_group:
  api.github.com:
    max_requests: 5000
    window_seconds: 3600
  slow.example.com:
    window_seconds: 30
"#;
        let config = GateConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.max_requests, 10);
        assert_eq!(config.window_seconds, 1.0);
        assert_eq!(config.group_by, GroupBy::Host);
        assert!(!config.throw_on_deny);
        assert_eq!(config.custom_deny_message.as_deref(), Some("Slow down"));
        assert!(!config.auto_negotiate);
        assert_eq!(
            config.per_group["api.github.com"],
            PolicyPatch {
                max_requests: Some(5000),
                window_seconds: Some(3600.0),
            }
        );
        assert_eq!(
            config.per_group["slow.example.com"],
            PolicyPatch::window_seconds(30.0)
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = GateConfig::from_yaml("max_requests: 2\nwindow_seconds: 1").unwrap();
        assert_eq!(config, GateConfig::new(2, 1.0));
    }

    #[test]
    fn test_invalid_window_fails_fast() {
        let err = GateConfig::from_yaml("max_requests: 2\nwindow_seconds: 0").unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));

        let yaml = r#"
max_requests: 2
window_seconds: 1
per_group:
  broken:
    window_seconds: -5
"#;
        let err = GateConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_negative_max_requests_rejected() {
        assert!(GateConfig::from_yaml("max_requests: -1\nwindow_seconds: 1").is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let err = GateConfig::from_file("/nonexistent/turnstile.yaml").unwrap_err();
        assert!(matches!(err, TurnstileError::Io(_)));
    }

    #[test]
    fn test_load_layered_file() {
        let path = std::env::temp_dir().join(format!("turnstile-{}.yaml", std::process::id()));
        std::fs::write(&path, "max_requests: 3\nwindow_seconds: 2\ngroup_by: host\n").unwrap();

        let config = GateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.max_requests, 3);
        assert_eq!(config.window_seconds, 2.0);
        assert_eq!(config.group_by, GroupBy::Host);
        assert!(config.throw_on_deny);
    }
}
