//! The contract every queue backend implements.

use crate::config::AdapterKind;
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobOptions, JobReceipt, JobStatus, JobUpdate};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// Error type returned by processors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a processor resolves to.
pub type ProcessorResult = Result<Value, BoxError>;

/// A registered job handler.
///
/// Receives an owned snapshot of the job (id, queue, data, options, status,
/// attempts, ...) and resolves to the job's result or an error.
pub type Processor = Arc<dyn Fn(Job) -> BoxFuture<'static, ProcessorResult> + Send + Sync>;

/// Wrap an async closure into a [`Processor`].
///
/// ```rust,ignore
/// let handler = processor(|job| async move {
///     send_email(&job.data).await?;
///     Ok(serde_json::json!({ "sent": true }))
/// });
/// ```
pub fn processor<F, Fut>(f: F) -> Processor
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessorResult> + Send + 'static,
{
    Arc::new(move |job| f(job).boxed())
}

/// Options for `process_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Maximum simultaneously in-flight jobs for the queue.
    pub concurrency: usize,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl ProcessOptions {
    /// Options with the given concurrency.
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency }
    }

    pub(crate) fn validate(&self) -> QueueResult<()> {
        if self.concurrency == 0 {
            return Err(QueueError::invalid_argument("concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// Derived per-queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Queue name.
    pub name: String,
    /// Sum of all other counters.
    pub total: u64,
    /// Pending jobs.
    pub pending: u64,
    /// Jobs currently being processed.
    pub processing: u64,
    /// Completed jobs still stored.
    pub completed: u64,
    /// Terminally failed jobs still stored.
    pub failed: u64,
    /// Jobs waiting for a delay.
    pub delayed: u64,
}

impl QueueInfo {
    /// Zeroed counters for `name`.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add `count` jobs in `status`. Recurring templates are not jobs and are
    /// not counted.
    pub fn record(&mut self, status: JobStatus, count: u64) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Delayed => &mut self.delayed,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Recurring => return,
        };
        *slot += count;
        self.total += count;
    }
}

/// Capability contract of a queue backend.
///
/// Every operation except [`initialize`](QueueAdapter::initialize) fails with
/// [`QueueError::NotInitialized`] before initialization or after
/// [`stop`](QueueAdapter::stop).
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Backend kind.
    fn kind(&self) -> AdapterKind;

    /// Whether `initialize()` succeeded and `stop()` has not been called.
    fn is_initialized(&self) -> bool;

    /// Prepare backend resources. Calling it again is a no-op.
    async fn initialize(&self) -> QueueResult<()>;

    /// Enqueue work and wake the processing loop.
    async fn add_job(&self, queue: &str, data: Value, options: JobOptions) -> QueueResult<JobReceipt>;

    /// Register (or replace) the processor for a queue.
    async fn process_jobs(
        &self,
        queue: &str,
        processor: Processor,
        options: ProcessOptions,
    ) -> QueueResult<()>;

    /// Point lookup.
    async fn get_job(&self, queue: &str, job_id: &JobId) -> QueueResult<Option<Job>>;

    /// Merge a partial update; false if the job does not exist.
    async fn update_job(&self, queue: &str, job_id: &JobId, update: JobUpdate) -> QueueResult<bool>;

    /// Delete a job and its scheduling state; false if absent.
    async fn remove_job(&self, queue: &str, job_id: &JobId) -> QueueResult<bool>;

    /// Snapshot of queue counters.
    async fn get_queue_info(&self, queue: &str) -> QueueResult<QueueInfo>;

    /// Delete every job of a queue. Always true.
    async fn clear_queue(&self, queue: &str) -> QueueResult<bool>;

    /// Release all resources. In-flight processors are not interrupted.
    async fn stop(&self) -> QueueResult<()>;
}

pub(crate) fn ensure_initialized(initialized: bool) -> QueueResult<()> {
    if initialized {
        Ok(())
    } else {
        Err(QueueError::NotInitialized)
    }
}

/// Run a processor in its own task so that a panic becomes a job failure.
///
/// Returns the processor's result or the failure message to record.
pub(crate) async fn run_processor(processor: &Processor, job: Job) -> Result<Value, String> {
    let span = tracing::info_span!(
        "job",
        queue = %job.queue,
        job_id = %job.id,
        attempt = job.attempts
    );
    let processor = Arc::clone(processor);
    let task = tokio::spawn(async move { processor(job).await }.instrument(span));

    match task.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("processor panicked: {message}"))
        }
        Err(_) => Err("processor task was cancelled".to_string()),
    }
}
