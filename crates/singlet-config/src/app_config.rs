//! Application configuration structures.

use serde::{Deserialize, Serialize};
use singlet_core::{SingletError, TelemetryConfig};
use singlet_queue::QueueConfig;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Job queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
}

impl AppConfig {
    /// Parses a configuration from TOML text. Missing sections take their
    /// defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, SingletError> {
        toml::from_str(s).map_err(|e| SingletError::Configuration(e.to_string()))
    }

    /// Renders the configuration as TOML, e.g. to seed a `default.toml`.
    pub fn to_toml_string(&self) -> Result<String, SingletError> {
        toml::to_string_pretty(self).map_err(|e| SingletError::Configuration(e.to_string()))
    }

    /// Whether this is a production deployment.
    pub fn is_production(&self) -> bool {
        self.app.environment.eq_ignore_ascii_case("production")
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "singlet".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use singlet_queue::AdapterKind;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.app.name, "singlet");
        assert_eq!(config.queue.adapter, AdapterKind::Memory);
        assert_eq!(config.queue.database.table_name, "queue_jobs");
        assert!(!config.is_production());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            [app]
            name = "worker"
            version = "1.0.0"
            environment = "production"

            [queue]
            adapter = "redis"

            [queue.redis]
            redis = "redis://cache:6379/2"
            prefix = "jobs"
            "#,
        )
        .unwrap();

        assert!(config.is_production());
        assert_eq!(config.queue.adapter, AdapterKind::Redis);
        assert_eq!(config.queue.redis.prefix, "jobs");
        assert_eq!(config.queue.redis.redis.url(), "redis://cache:6379/2");
        assert_eq!(config.queue.redis.pool_size, 10);
    }

    #[test]
    fn test_toml_output_parses_back() {
        let rendered = AppConfig::default().to_toml_string().unwrap();
        let parsed = AppConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.queue.database.poll_interval_ms, 1000);
    }
}
