//! Queue configuration.

use crate::error::{QueueError, QueueResult};
use crate::job::JobOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which backend a queue runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// In-process, non-durable.
    #[default]
    Memory,
    /// SQL table polled by the adapter.
    Database,
    /// Redis-backed native queue.
    Redis,
}

impl AdapterKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Memory => "memory",
            AdapterKind::Database => "database",
            AdapterKind::Redis => "redis",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(AdapterKind::Memory),
            "database" => Ok(AdapterKind::Database),
            "redis" => Ok(AdapterKind::Redis),
            other => Err(QueueError::Configuration(format!(
                "unknown queue adapter: {other}"
            ))),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Backend selected by `init_from_config`.
    #[serde(default)]
    pub adapter: AdapterKind,

    /// Options merged under every job's own options.
    #[serde(default, alias = "defaultJobOptions")]
    pub default_job_options: JobOptions,

    /// Database adapter settings.
    #[serde(default)]
    pub database: DatabaseAdapterConfig,

    /// Redis adapter settings.
    #[serde(default)]
    pub redis: RedisAdapterConfig,
}

impl QueueConfig {
    /// Check the settings every adapter relies on.
    pub fn validate(&self) -> QueueResult<()> {
        self.default_job_options.validate()?;
        self.database.validate()?;
        self.redis.validate()?;
        Ok(())
    }

    /// Defaults for the Redis adapter: its own options layered over the
    /// common ones.
    pub fn redis_job_options(&self) -> JobOptions {
        match &self.redis.default_job_options {
            Some(options) => options.clone().merged_with(&self.default_job_options),
            None => self.default_job_options.clone(),
        }
    }
}

/// Database adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseAdapterConfig {
    /// Driver name looked up in the driver registry.
    #[serde(default = "default_database_type", alias = "databaseType")]
    pub database_type: String,

    /// Connection settings handed to the driver.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Jobs table.
    #[serde(default = "default_table_name", alias = "tableName")]
    pub table_name: String,

    /// Polling interval in milliseconds.
    #[serde(default = "default_db_poll_interval_ms", alias = "pollInterval")]
    pub poll_interval_ms: u64,

    /// Cap on jobs claimed per queue per poll.
    #[serde(default = "default_max_concurrency", alias = "maxConcurrency")]
    pub max_concurrency: usize,
}

fn default_database_type() -> String {
    "sqlite".to_string()
}

fn default_table_name() -> String {
    "queue_jobs".to_string()
}

fn default_db_poll_interval_ms() -> u64 {
    1000
}

fn default_max_concurrency() -> usize {
    10
}

impl Default for DatabaseAdapterConfig {
    fn default() -> Self {
        Self {
            database_type: default_database_type(),
            connection: ConnectionConfig::default(),
            table_name: default_table_name(),
            poll_interval_ms: default_db_poll_interval_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl DatabaseAdapterConfig {
    /// Polling interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn validate(&self) -> QueueResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(QueueError::Configuration(
                "database poll interval must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(QueueError::Configuration(
                "database max concurrency must be at least 1".to_string(),
            ));
        }
        validate_table_name(&self.table_name)
    }
}

/// Connection settings for the database drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Pool acquire timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ConnectionConfig {
    /// Connection settings for `url` with default pool sizing.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Acquire timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Redis server location: a URL or its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RedisConnection {
    /// `redis://[:password@]host[:port][/db]`
    Url(String),
    /// Host, port, password and database number.
    Params {
        /// Host name.
        host: String,
        /// Port.
        #[serde(default = "default_redis_port")]
        port: u16,
        /// Password.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        /// Database number.
        #[serde(default)]
        db: i64,
    },
}

fn default_redis_port() -> u16 {
    6379
}

impl Default for RedisConnection {
    fn default() -> Self {
        RedisConnection::Url("redis://localhost:6379".to_string())
    }
}

impl RedisConnection {
    /// Connection URL.
    pub fn url(&self) -> String {
        match self {
            RedisConnection::Url(url) => url.clone(),
            RedisConnection::Params {
                host,
                port,
                password: Some(password),
                db,
            } => format!("redis://:{password}@{host}:{port}/{db}"),
            RedisConnection::Params {
                host,
                port,
                password: None,
                db,
            } => format!("redis://{host}:{port}/{db}"),
        }
    }
}

/// Redis adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisAdapterConfig {
    /// Server location.
    #[serde(default)]
    pub redis: RedisConnection,

    /// Key prefix.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Idle worker poll interval in milliseconds.
    #[serde(default = "default_redis_poll_interval_ms", alias = "pollInterval")]
    pub poll_interval_ms: u64,

    /// Options for this adapter, layered over the common defaults.
    #[serde(default, alias = "defaultJobOptions", skip_serializing_if = "Option::is_none")]
    pub default_job_options: Option<JobOptions>,
}

fn default_prefix() -> String {
    "bull".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_redis_poll_interval_ms() -> u64 {
    100
}

impl Default for RedisAdapterConfig {
    fn default() -> Self {
        Self {
            redis: RedisConnection::default(),
            prefix: default_prefix(),
            pool_size: default_pool_size(),
            poll_interval_ms: default_redis_poll_interval_ms(),
            default_job_options: None,
        }
    }
}

impl RedisAdapterConfig {
    /// Idle poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn validate(&self) -> QueueResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(QueueError::Configuration(
                "redis poll interval must be positive".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(QueueError::Configuration(
                "redis pool size must be at least 1".to_string(),
            ));
        }
        if self.prefix.trim().is_empty() {
            return Err(QueueError::Configuration(
                "redis key prefix must not be empty".to_string(),
            ));
        }
        if let Some(options) = &self.default_job_options {
            options.validate()?;
        }
        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(name: &str) -> QueueResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(QueueError::Configuration(format!(
            "invalid table name: {name:?}"
        )))
    }
}
