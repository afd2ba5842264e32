//! Shared helpers for adapter integration tests.

#![allow(dead_code)]

use singlet_queue::{
    ConnectionConfig, DatabaseAdapterConfig, Job, JobId, JobStatus, QueueAdapter, RedisAdapterConfig,
    RedisConnection,
};
use std::time::Duration;

/// Environment variable naming the Redis server used by ignored tests.
pub const REDIS_URL_ENV: &str = "SINGLET_TEST_REDIS_URL";

/// Database settings for a private in-memory SQLite database.
pub fn sqlite_config(poll_interval_ms: u64) -> DatabaseAdapterConfig {
    DatabaseAdapterConfig {
        database_type: "sqlite".to_string(),
        connection: ConnectionConfig::with_url("sqlite::memory:"),
        poll_interval_ms,
        ..DatabaseAdapterConfig::default()
    }
}

/// Redis settings pointing at the test server, with a prefix unique to the
/// calling test.
pub fn redis_config(prefix: &str) -> RedisAdapterConfig {
    let url = std::env::var(REDIS_URL_ENV).unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisAdapterConfig {
        redis: RedisConnection::Url(url),
        prefix: format!("singlet-test-{prefix}-{}", uuid::Uuid::new_v4().simple()),
        poll_interval_ms: 20,
        ..RedisAdapterConfig::default()
    }
}

/// Poll until the job reaches `status`, panicking after about five seconds.
pub async fn wait_for_status(adapter: &dyn QueueAdapter, queue: &str, id: &JobId, status: JobStatus) -> Job {
    for _ in 0..250 {
        if let Some(job) = adapter.get_job(queue, id).await.expect("get_job failed") {
            if job.status == status {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} in {queue} never reached {status}");
}

/// Poll until the job no longer exists.
pub async fn wait_until_gone(adapter: &dyn QueueAdapter, queue: &str, id: &JobId) {
    for _ in 0..250 {
        if adapter.get_job(queue, id).await.expect("get_job failed").is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} in {queue} was never removed");
}
