//! Integration tests for DatabaseAdapter.
//!
//! These tests run against a private in-memory SQLite database per test.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{sqlite_config, wait_for_status, wait_until_gone};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use singlet_queue::database::{DriverConnector, SqliteJobStore};
use singlet_queue::{
    processor, BackoffOptions, BoxError, ConnectionConfig, DatabaseAdapter, DriverRegistry, Job, JobId,
    JobOptions, JobStatus, JobStore, JobUpdate, ProcessOptions, QueueAdapter, QueueError, QueueResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

async fn create_adapter() -> DatabaseAdapter {
    let adapter = DatabaseAdapter::new(sqlite_config(20), JobOptions::new());
    adapter.initialize().await.expect("Failed to initialize adapter");
    adapter
}

fn fast_retries(max_attempts: u32) -> JobOptions {
    JobOptions::new()
        .with_max_attempts(max_attempts)
        .with_backoff(BackoffOptions::fixed(10))
}

#[tokio::test]
async fn test_operations_require_initialize() {
    let adapter = DatabaseAdapter::new(sqlite_config(20), JobOptions::new());
    let err = adapter.add_job("q", json!(1), JobOptions::new()).await.unwrap_err();
    assert!(matches!(err, QueueError::NotInitialized));

    assert_ok!(adapter.initialize().await);
    assert_ok!(adapter.initialize().await);
    assert!(adapter.is_initialized());
}

#[tokio::test]
async fn test_add_and_get_job() {
    let adapter = create_adapter().await;

    let receipt = adapter
        .add_job("emails", json!({"to": "user@example.com"}), JobOptions::new().with_priority(2))
        .await
        .expect("Failed to add job");
    assert_eq!(receipt.status, JobStatus::Pending);

    let job = adapter
        .get_job("emails", &receipt.id)
        .await
        .expect("Query failed")
        .expect("Job not found");
    assert_eq!(job.data, json!({"to": "user@example.com"}));
    assert_eq!(job.priority(), 2);
    assert_eq!(job.attempts, 0);

    let missing = adapter.get_job("emails", &JobId::new()).await.expect("Query failed");
    assert!(missing.is_none());
    let other_queue = adapter.get_job("reports", &receipt.id).await.expect("Query failed");
    assert!(other_queue.is_none());
}

#[tokio::test]
async fn test_processes_job_and_stores_result() {
    let adapter = create_adapter().await;
    adapter
        .process_jobs(
            "math",
            processor(|job| async move {
                let n = job.data["n"].as_i64().unwrap_or_default();
                Ok(json!({"square": n * n}))
            }),
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    let receipt = adapter.add_job("math", json!({"n": 7}), JobOptions::new()).await.unwrap();
    let job = wait_for_status(&adapter, "math", &receipt.id, JobStatus::Completed).await;

    assert_eq!(job.result, Some(json!({"square": 49})));
    assert_eq!(job.attempts, 1);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_priority_then_fifo_order() {
    let adapter = create_adapter().await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    for (label, priority) in [("low-1", 0), ("high", 10), ("low-2", 0), ("mid", 5)] {
        adapter
            .add_job("ordered", json!({"label": label}), JobOptions::new().with_priority(priority))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let sink = Arc::clone(&seen);
    adapter
        .process_jobs(
            "ordered",
            processor(move |job| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(job.data["label"].as_str().unwrap_or_default().to_string());
                    Ok(Value::Null)
                }
            }),
            ProcessOptions::with_concurrency(1),
        )
        .await
        .unwrap();

    for _ in 0..250 {
        if seen.lock().len() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(*seen.lock(), vec!["high", "mid", "low-1", "low-2"]);
}

#[tokio::test]
async fn test_delayed_job_is_reported_then_processed() {
    let adapter = create_adapter().await;
    adapter
        .process_jobs("later", processor(|_job| async move { Ok(json!("done")) }), ProcessOptions::default())
        .await
        .unwrap();

    let receipt = adapter
        .add_job("later", json!({}), JobOptions::new().with_delay(Duration::from_millis(300)))
        .await
        .unwrap();
    assert_eq!(receipt.status, JobStatus::Delayed);

    let info = adapter.get_queue_info("later").await.unwrap();
    assert_eq!(info.delayed, 1);
    assert_eq!(info.pending, 0);

    let job = wait_for_status(&adapter, "later", &receipt.id, JobStatus::Completed).await;
    let started = job.started_at.expect("started_at not set");
    assert!(started >= job.process_after);
}

#[tokio::test]
async fn test_retries_until_terminal_failure() {
    let adapter = create_adapter().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    adapter
        .process_jobs(
            "flaky",
            processor(move |_job| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, BoxError>("smtp unavailable".into())
                }
            }),
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    let receipt = adapter.add_job("flaky", json!({}), fast_retries(3)).await.unwrap();
    let job = wait_for_status(&adapter, "flaky", &receipt.id, JobStatus::Failed).await;

    assert_eq!(job.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(job.error.as_deref(), Some("smtp unavailable"));
    assert!(job.failed_at.is_some());

    let failed = adapter.get_failed_jobs("flaky", 10, 0).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, receipt.id);
}

#[tokio::test]
async fn test_retry_job_runs_failed_job_again() {
    let adapter = create_adapter().await;
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&healthy);

    adapter
        .process_jobs(
            "sync",
            processor(move |_job| {
                let flag = Arc::clone(&flag);
                async move {
                    if flag.load(Ordering::SeqCst) {
                        Ok(json!("synced"))
                    } else {
                        Err::<Value, BoxError>("upstream down".into())
                    }
                }
            }),
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    let receipt = adapter.add_job("sync", json!({}), fast_retries(1)).await.unwrap();
    wait_for_status(&adapter, "sync", &receipt.id, JobStatus::Failed).await;

    healthy.store(true, Ordering::SeqCst);
    assert!(adapter.retry_job("sync", &receipt.id).await.unwrap());

    let job = wait_for_status(&adapter, "sync", &receipt.id, JobStatus::Completed).await;
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error, None);
    assert_eq!(job.result, Some(json!("synced")));

    let err = adapter.retry_job("sync", &receipt.id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidState { .. }));
    assert!(!adapter.retry_job("sync", &JobId::new()).await.unwrap());
}

#[tokio::test]
async fn test_update_remove_and_clear() {
    let adapter = create_adapter().await;
    let first = adapter.add_job("edit", json!({"v": 1}), JobOptions::new()).await.unwrap();
    let second = adapter.add_job("edit", json!({"v": 2}), JobOptions::new()).await.unwrap();

    let updated = adapter
        .update_job("edit", &first.id, JobUpdate::new().data(json!({"v": 10})).priority(4))
        .await
        .unwrap();
    assert!(updated);

    let job = adapter.get_job("edit", &first.id).await.unwrap().unwrap();
    assert_eq!(job.data, json!({"v": 10}));
    assert_eq!(job.priority(), 4);

    let empty = adapter.update_job("edit", &first.id, JobUpdate::new()).await;
    assert!(matches!(empty, Err(QueueError::InvalidArgument(_))));
    assert!(!adapter
        .update_job("edit", &JobId::new(), JobUpdate::new().priority(1))
        .await
        .unwrap());

    assert!(adapter.remove_job("edit", &second.id).await.unwrap());
    assert!(!adapter.remove_job("edit", &second.id).await.unwrap());
    assert_eq!(adapter.get_queue_info("edit").await.unwrap().total, 1);

    assert!(adapter.clear_queue("edit").await.unwrap());
    assert_eq!(adapter.get_queue_info("edit").await.unwrap().total, 0);
}

#[tokio::test]
async fn test_remove_on_complete_deletes_job() {
    let adapter = create_adapter().await;
    adapter
        .process_jobs("ephemeral", processor(|_job| async move { Ok(Value::Null) }), ProcessOptions::default())
        .await
        .unwrap();

    let receipt = adapter
        .add_job("ephemeral", json!({}), JobOptions::new().with_remove_on_complete(true))
        .await
        .unwrap();
    wait_until_gone(&adapter, "ephemeral", &receipt.id).await;
}

#[tokio::test]
async fn test_concurrency_is_capped() {
    let adapter = create_adapter().await;
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (running_ref, peak_ref) = (Arc::clone(&running), Arc::clone(&peak));
    adapter
        .process_jobs(
            "bounded",
            processor(move |_job| {
                let running = Arc::clone(&running_ref);
                let peak = Arc::clone(&peak_ref);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }),
            ProcessOptions::with_concurrency(2),
        )
        .await
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(adapter.add_job("bounded", json!({"i": i}), JobOptions::new()).await.unwrap().id);
    }
    for id in &ids {
        wait_for_status(&adapter, "bounded", id, JobStatus::Completed).await;
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_recurring_job_is_stored_but_not_counted() {
    let adapter = create_adapter().await;

    let receipt = adapter
        .create_recurring_job("reports", "0 0 * * * *", json!({"kind": "hourly"}), JobOptions::new())
        .await
        .unwrap();
    assert_eq!(receipt.status, JobStatus::Recurring);

    let job = adapter.get_job("reports", &receipt.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Recurring);
    assert!(job.process_after > Utc::now());

    let info = adapter.get_queue_info("reports").await.unwrap();
    assert_eq!(info.total, 0);

    let metrics = adapter.get_processing_metrics("reports").await.unwrap();
    assert_eq!(metrics.recurring, 1);

    let invalid = adapter
        .create_recurring_job("reports", "every hour", json!({}), JobOptions::new())
        .await;
    assert!(matches!(invalid, Err(QueueError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_cleanup_old_jobs_removes_finished() {
    let adapter = create_adapter().await;
    adapter
        .process_jobs("cleanup", processor(|_job| async move { Ok(Value::Null) }), ProcessOptions::default())
        .await
        .unwrap();

    let done = adapter.add_job("cleanup", json!({}), JobOptions::new()).await.unwrap();
    wait_for_status(&adapter, "cleanup", &done.id, JobStatus::Completed).await;

    assert_eq!(adapter.cleanup_old_jobs("cleanup", Duration::from_secs(3600)).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(adapter.cleanup_old_jobs("cleanup", Duration::ZERO).await.unwrap(), 1);
    assert!(adapter.get_job("cleanup", &done.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_processing_metrics() {
    let adapter = create_adapter().await;
    adapter
        .process_jobs(
            "stats",
            processor(|job| async move {
                if job.data["fail"].as_bool().unwrap_or(false) {
                    Err::<Value, BoxError>("bad input".into())
                } else {
                    Ok(Value::Null)
                }
            }),
            ProcessOptions::with_concurrency(3),
        )
        .await
        .unwrap();

    let ok = adapter.add_job("stats", json!({"fail": false}), JobOptions::new()).await.unwrap();
    let bad = adapter.add_job("stats", json!({"fail": true}), fast_retries(1)).await.unwrap();
    wait_for_status(&adapter, "stats", &ok.id, JobStatus::Completed).await;
    wait_for_status(&adapter, "stats", &bad.id, JobStatus::Failed).await;

    let metrics = adapter.get_processing_metrics("stats").await.unwrap();
    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.concurrency, Some(3));
    assert_eq!(metrics.queue.completed, 1);
    assert_eq!(metrics.queue.failed, 1);
    assert!(metrics.average_duration_ms.is_some());
}

#[tokio::test]
async fn test_unknown_driver_is_unavailable() {
    let mut config = sqlite_config(20);
    config.database_type = "oracle".to_string();
    let adapter = DatabaseAdapter::new(config, JobOptions::new());

    let err = adapter.initialize().await.unwrap_err();
    assert!(matches!(err, QueueError::DriverUnavailable(name) if name == "oracle"));
    assert!(!adapter.is_initialized());
}

#[tokio::test]
async fn test_stop_rejects_further_calls() {
    let adapter = create_adapter().await;
    adapter.add_job("q", json!(1), JobOptions::new()).await.unwrap();

    adapter.stop().await.unwrap();
    adapter.stop().await.unwrap();
    assert!(!adapter.is_initialized());
    assert!(matches!(adapter.get_queue_info("q").await, Err(QueueError::NotInitialized)));
}

/// Store whose first `failures` claims fail and whose point reads return
/// `read_delay` after the row was read.
struct FlakyStore {
    inner: SqliteJobStore,
    failures: Arc<AtomicUsize>,
    read_delay: Duration,
}

#[async_trait]
impl JobStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn ensure_schema(&self) -> QueueResult<()> {
        self.inner.ensure_schema().await
    }

    async fn insert(&self, job: &Job, cron: Option<&str>) -> QueueResult<()> {
        self.inner.insert(job, cron).await
    }

    async fn claim(&self, queue: &str, limit: usize, now: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(QueueError::Internal("connection reset".to_string()));
        }
        self.inner.claim(queue, limit, now).await
    }

    async fn get(&self, queue: &str, id: &JobId) -> QueueResult<Option<Job>> {
        let job = self.inner.get(queue, id).await?;
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        Ok(job)
    }

    async fn save(&self, job: &Job) -> QueueResult<bool> {
        self.inner.save(job).await
    }

    async fn update_fields(&self, job: &Job, reschedule: bool) -> QueueResult<bool> {
        self.inner.update_fields(job, reschedule).await
    }

    async fn delete(&self, queue: &str, id: &JobId) -> QueueResult<bool> {
        self.inner.delete(queue, id).await
    }

    async fn count_by_status(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Vec<(JobStatus, u64)>> {
        self.inner.count_by_status(queue, now).await
    }

    async fn clear(&self, queue: &str) -> QueueResult<u64> {
        self.inner.clear(queue).await
    }

    async fn list_by_status(
        &self,
        queue: &str,
        status: JobStatus,
        limit: usize,
        offset: usize,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>> {
        self.inner.list_by_status(queue, status, limit, offset, now).await
    }

    async fn delete_finished_before(&self, queue: &str, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        self.inner.delete_finished_before(queue, cutoff).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

async fn create_flaky_adapter(failures: Arc<AtomicUsize>, read_delay: Duration) -> DatabaseAdapter {
    let connector: DriverConnector = Arc::new(move |connection: ConnectionConfig, table: String| {
        let failures = Arc::clone(&failures);
        async move {
            let inner = SqliteJobStore::connect(&connection, &table).await?;
            Ok::<Arc<dyn JobStore>, QueueError>(Arc::new(FlakyStore {
                inner,
                failures,
                read_delay,
            }))
        }
        .boxed()
    });
    let mut registry = DriverRegistry::empty();
    registry.register("flaky", connector);

    let mut config = sqlite_config(20);
    config.database_type = "flaky".to_string();
    let adapter = DatabaseAdapter::with_registry(config, JobOptions::new(), registry);
    adapter.initialize().await.unwrap();
    adapter
}

#[tokio::test]
async fn test_poller_recovers_from_store_errors() {
    let failures = Arc::new(AtomicUsize::new(2));
    let adapter = create_flaky_adapter(Arc::clone(&failures), Duration::ZERO).await;

    adapter
        .process_jobs("resilient", processor(|_job| async move { Ok(json!("ok")) }), ProcessOptions::default())
        .await
        .unwrap();
    let receipt = adapter.add_job("resilient", json!({}), JobOptions::new()).await.unwrap();

    wait_for_status(&adapter, "resilient", &receipt.id, JobStatus::Completed).await;
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_update_does_not_revert_a_concurrent_claim() {
    let adapter = create_flaky_adapter(Arc::new(AtomicUsize::new(0)), Duration::from_millis(150)).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let receipt = adapter
        .add_job("racy", json!({"v": 1}), JobOptions::new().with_max_attempts(1))
        .await
        .unwrap();

    // The update reads the pending row, then the poller claims it before the
    // update is written.
    let (updated, registered) = tokio::join!(
        adapter.update_job("racy", &receipt.id, JobUpdate::new().data(json!({"v": 2}))),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            adapter
                .process_jobs(
                    "racy",
                    processor(move |_job| {
                        let counter = Arc::clone(&counter);
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Err::<Value, BoxError>("always fails".into())
                        }
                    }),
                    ProcessOptions::default(),
                )
                .await
        }
    );
    assert!(assert_ok!(updated));
    assert_ok!(registered);

    let job = wait_for_status(&adapter, "racy", &receipt.id, JobStatus::Failed).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.data, json!({"v": 2}));
}

#[tokio::test]
async fn test_queue_info_counts_every_status() {
    let adapter = create_adapter().await;
    adapter
        .process_jobs(
            "mixed",
            processor(|job| async move {
                if job.data["hold"].as_bool().unwrap_or_default() {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                if job.data["fail"].as_bool().unwrap_or_default() {
                    return Err::<Value, BoxError>("bad input".into());
                }
                Ok(Value::Null)
            }),
            ProcessOptions::with_concurrency(1),
        )
        .await
        .unwrap();

    let ok = adapter.add_job("mixed", json!({"n": 1}), JobOptions::new()).await.unwrap();
    wait_for_status(&adapter, "mixed", &ok.id, JobStatus::Completed).await;
    let bad = adapter
        .add_job("mixed", json!({"fail": true}), JobOptions::new().with_max_attempts(1))
        .await
        .unwrap();
    wait_for_status(&adapter, "mixed", &bad.id, JobStatus::Failed).await;
    let held = adapter.add_job("mixed", json!({"hold": true}), JobOptions::new()).await.unwrap();
    wait_for_status(&adapter, "mixed", &held.id, JobStatus::Processing).await;
    adapter.add_job("mixed", json!({"n": 2}), JobOptions::new()).await.unwrap();
    adapter
        .add_job("mixed", json!({"n": 3}), JobOptions::new().with_delay(Duration::from_secs(60)))
        .await
        .unwrap();

    let info = adapter.get_queue_info("mixed").await.unwrap();
    assert_eq!(info.completed, 1);
    assert_eq!(info.failed, 1);
    assert_eq!(info.processing, 1);
    assert_eq!(info.pending, 1);
    assert_eq!(info.delayed, 1);
    assert_eq!(info.total, 5);
    assert_eq!(
        info.pending + info.processing + info.completed + info.failed + info.delayed,
        info.total
    );
}
