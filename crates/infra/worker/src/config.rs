//! Worker configuration.

use std::path::Path;

use clipper_webhooks::WebhookConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file when no path is passed.
pub const CONFIG_ENV: &str = "CLIPPER_CONFIG";

/// Worker-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Handle inbound provider retries as well as outbound deliveries.
    pub inbound_retries: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            inbound_retries: true,
        }
    }
}

/// Full configuration: a `[worker]` table and a `[webhooks]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker: WorkerSettings,
    pub webhooks: WebhookConfig,
}

impl WorkerConfig {
    /// Parses TOML. Missing tables fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: toml::Value = toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let worker: WorkerSettings = config
            .get("worker")
            .map(|v| toml::Value::try_into(v.clone()))
            .transpose()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?
            .unwrap_or_default();

        let webhooks: WebhookConfig = config
            .get("webhooks")
            .map(|v| toml::Value::try_into(v.clone()))
            .transpose()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?
            .unwrap_or_default();

        let config = Self { worker, webhooks };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.webhooks;
        if w.max_attempts == 0 {
            return Err(ConfigError::Invalid("webhooks.max_attempts must be at least 1".into()));
        }
        if w.batch_size == 0 {
            return Err(ConfigError::Invalid("webhooks.batch_size must be at least 1".into()));
        }
        if w.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("webhooks.poll_interval_secs must be at least 1".into()));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<WorkerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {e}", path.display())))?;
    WorkerConfig::from_toml_str(&content)
}

/// Picks the config path: first CLI argument, then [`CONFIG_ENV`].
pub fn config_path(arg: Option<String>, env: Option<String>) -> Option<String> {
    arg.or(env).filter(|p| !p.trim().is_empty())
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.worker.log_level, "info");
        assert_eq!(config.webhooks.max_attempts, 5);
        assert_eq!(config.webhooks.poll_interval_secs, 30);
    }

    #[test]
    fn test_partial_tables() {
        let config = WorkerConfig::from_toml_str(
            r#"
            [worker]
            log_level = "debug"

            [webhooks]
            batch_size = 25
            allow_http = false
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.log_level, "debug");
        assert!(config.worker.inbound_retries);
        assert_eq!(config.webhooks.batch_size, 25);
        assert!(!config.webhooks.allow_http);
        assert_eq!(config.webhooks.max_attempts, 5);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = WorkerConfig::from_toml_str("").unwrap();
        assert_eq!(config.webhooks.batch_size, 100);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            WorkerConfig::from_toml_str("[webhooks]\nbatch_size = \"many\""),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            WorkerConfig::from_toml_str("[webhooks]\nmax_attempts = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/clipper.toml"),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_config_path_precedence() {
        assert_eq!(
            config_path(Some("a.toml".into()), Some("b.toml".into())),
            Some("a.toml".to_string())
        );
        assert_eq!(config_path(None, Some("b.toml".into())), Some("b.toml".to_string()));
        assert_eq!(config_path(None, Some("  ".into())), None);
        assert_eq!(config_path(None, None), None);
    }
}
