//! Redis-backed adapter.
//!
//! Jobs are stored in Bull's vocabulary (`waiting`, `delayed`, `active`,
//! `completed`, `failed`) and translated to [`JobStatus`] at the adapter
//! boundary. Pausing is a per-queue flag, not a job state. Per queue the
//! layout is:
//!
//! | key                        | type   | content                          |
//! |----------------------------|--------|----------------------------------|
//! | `{prefix}:{queue}:id`      | string | id counter                       |
//! | `{prefix}:{queue}:jobs`    | hash   | id -> serialized [`NativeJob`]   |
//! | `{prefix}:{queue}:wait`    | zset   | waiting ids by priority score    |
//! | `{prefix}:{queue}:delayed` | zset   | delayed ids by due time (ms)     |
//! | `{prefix}:{queue}:active`  | set    | ids being processed              |
//! | `{prefix}:{queue}:completed` | zset | ids by completion time (ms)      |
//! | `{prefix}:{queue}:failed`  | zset   | ids by failure time (ms)         |
//! | `{prefix}:{queue}:paused`  | string | present while the queue is paused |
//!
//! [`JobStatus`]: crate::job::JobStatus

mod native;
mod queue;

pub use native::{NativeJob, NativeOptions, NativeState};
pub use queue::RedisAdapter;

use crate::config::RedisAdapterConfig;
use crate::error::{QueueError, QueueResult};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool and check it with `PING`.
pub async fn create_pool(config: &RedisAdapterConfig) -> QueueResult<Pool> {
    info!(prefix = %config.prefix, "Creating Redis connection pool for queue adapter");

    let cfg = Config::from_url(config.redis.url());

    let pool = cfg
        .builder()
        .map_err(|e| QueueError::Configuration(format!("Invalid Redis config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueueError::Configuration(format!("Failed to create pool: {e}")))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!(pool_size = config.pool_size, "Redis connection pool created");
    Ok(pool)
}

/// Sorted-set score for the wait list: higher priority first, then older
/// first.
pub fn priority_score(priority: i32, timestamp_ms: i64) -> f64 {
    -f64::from(priority) * 1_000_000_000_000.0 + timestamp_ms as f64
}

/// Redis key builder.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self, queue: &str, suffix: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, suffix)
    }

    /// Id counter.
    pub fn id(&self, queue: &str) -> String {
        self.key(queue, "id")
    }

    /// Job hash.
    pub fn jobs(&self, queue: &str) -> String {
        self.key(queue, "jobs")
    }

    /// Waiting ids.
    pub fn wait(&self, queue: &str) -> String {
        self.key(queue, "wait")
    }

    /// Delayed ids.
    pub fn delayed(&self, queue: &str) -> String {
        self.key(queue, "delayed")
    }

    /// Active ids.
    pub fn active(&self, queue: &str) -> String {
        self.key(queue, "active")
    }

    /// Completed ids.
    pub fn completed(&self, queue: &str) -> String {
        self.key(queue, "completed")
    }

    /// Failed ids.
    pub fn failed(&self, queue: &str) -> String {
        self.key(queue, "failed")
    }

    /// Pause flag.
    pub fn paused(&self, queue: &str) -> String {
        self.key(queue, "paused")
    }

    /// Every key holding jobs; the id counter and pause flag are not included.
    pub fn job_keys(&self, queue: &str) -> Vec<String> {
        vec![
            self.jobs(queue),
            self.wait(queue),
            self.delayed(queue),
            self.active(queue),
            self.completed(queue),
            self.failed(queue),
        ]
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("bull")
    }
}
