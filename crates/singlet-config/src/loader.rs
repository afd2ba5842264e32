//! Configuration loader with layered sources.

use crate::AppConfig;
use config::{Config, ConfigError, Environment, File};
use singlet_core::SingletError;
use singlet_queue::AdapterKind;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "SINGLET";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `{config_dir}/default.toml` - Default values
    /// 2. `{config_dir}/{environment}.toml` - Environment-specific overrides
    /// 3. `{config_dir}/local.toml` - Local overrides
    /// 4. Environment variables such as `SINGLET_QUEUE__ADAPTER=redis`
    ///
    /// The environment name comes from `SINGLET_ENVIRONMENT` and defaults to
    /// `development`.
    pub fn new(config_dir: impl Into<String>) -> Result<Self, SingletError> {
        Self::with_env_prefix(config_dir, ENV_PREFIX)
    }

    /// Like [`new`](Self::new) with a different environment variable prefix.
    pub fn with_env_prefix(
        config_dir: impl Into<String>,
        env_prefix: impl Into<String>,
    ) -> Result<Self, SingletError> {
        let config_dir = config_dir.into();
        let env_prefix = env_prefix.into();
        let config = Self::load_config(&config_dir, &env_prefix)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
            env_prefix,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, SingletError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk. The current configuration is
    /// kept if the new one does not load or validate.
    pub async fn reload(&self) -> Result<(), SingletError> {
        let new_config = Self::load_config(&self.config_dir, &self.env_prefix)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    fn load_config(config_dir: &str, env_prefix: &str) -> Result<AppConfig, SingletError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment = std::env::var(format!("{env_prefix}_ENVIRONMENT"))
            .unwrap_or_else(|_| "development".to_string());
        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{config_dir}/{name}.toml");
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_singlet_error)?;
        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_singlet_error)?;

        Self::validate_config(&app_config)?;
        Ok(app_config)
    }

    /// Validates the configuration.
    pub fn validate_config(config: &AppConfig) -> Result<(), SingletError> {
        config
            .queue
            .validate()
            .map_err(|e| SingletError::Configuration(e.to_string()))?;

        if config.is_production() && config.queue.adapter == AdapterKind::Memory {
            warn!("Using the in-memory queue adapter in production; jobs will not survive a restart.");
        }

        Ok(())
    }

    /// Gets a specific configuration value by key path, e.g.
    /// `queue.database.table_name`.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error_to_singlet_error(err: ConfigError) -> SingletError {
    SingletError::Configuration(err.to_string())
}
