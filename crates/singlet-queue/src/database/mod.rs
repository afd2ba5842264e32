//! Database-backed adapter.
//!
//! Jobs are rows in a single table. A background poller wakes every
//! `poll_interval` (or as soon as a job is added), claims up to
//! `min(concurrency, max_concurrency)` eligible jobs per registered queue and
//! runs them, waiting for the whole batch before polling again.
//!
//! ```rust,ignore
//! let adapter = DatabaseAdapter::new(DatabaseAdapterConfig::default(), JobOptions::new());
//! adapter.initialize().await?;
//! adapter.add_job("reports", json!({"month": "2024-01"}), JobOptions::new()).await?;
//! ```

pub mod driver;
pub mod postgres;
mod row;
pub mod sqlite;

pub use driver::{DriverConnector, DriverRegistry, JobStore};
pub use postgres::PostgresJobStore;
pub use sqlite::SqliteJobStore;

use crate::adapter::{
    ensure_initialized, run_processor, ProcessOptions, Processor, QueueAdapter, QueueInfo,
};
use crate::config::{AdapterKind, DatabaseAdapterConfig, QueueConfig};
use crate::error::{ensure_queue_name, QueueError, QueueResult};
use crate::job::{ensure_data, FailureOutcome, Job, JobId, JobOptions, JobReceipt, JobStatus, JobUpdate};
use crate::metrics::JobMetrics;
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Queue adapter that persists jobs in a SQL table.
#[derive(Clone)]
pub struct DatabaseAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    config: DatabaseAdapterConfig,
    defaults: JobOptions,
    registry: DriverRegistry,
    initialized: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    store: RwLock<Option<Arc<dyn JobStore>>>,
    registrations: RwLock<HashMap<String, Registration>>,
    counters: Mutex<HashMap<String, QueueCounters>>,
    wake: Notify,
    poller: Mutex<Option<Poller>>,
}

#[derive(Clone)]
struct Registration {
    processor: Processor,
    concurrency: usize,
}

struct Poller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default, Clone)]
struct QueueCounters {
    in_flight: usize,
    processed: u64,
    failed: u64,
    retried: u64,
    busy: Duration,
}

/// Processing statistics for one queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    /// Stored job counts.
    pub queue: QueueInfo,
    /// Recurring templates stored for the queue.
    pub recurring: u64,
    /// Jobs claimed and still running.
    pub in_flight: usize,
    /// Registered concurrency, if a processor is registered.
    pub concurrency: Option<usize>,
    /// Attempts that completed successfully since initialization.
    pub processed: u64,
    /// Attempts that failed terminally since initialization.
    pub failed: u64,
    /// Retries scheduled since initialization.
    pub retried: u64,
    /// Mean processor run time over all finished attempts.
    pub average_duration_ms: Option<f64>,
}

impl DatabaseAdapter {
    /// Creates an adapter using the built-in drivers.
    pub fn new(config: DatabaseAdapterConfig, defaults: JobOptions) -> Self {
        Self::with_registry(config, defaults, DriverRegistry::default())
    }

    /// Creates an adapter that resolves `database_type` in `registry`.
    pub fn with_registry(
        config: DatabaseAdapterConfig,
        defaults: JobOptions,
        registry: DriverRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                defaults,
                registry,
                initialized: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                store: RwLock::new(None),
                registrations: RwLock::new(HashMap::new()),
                counters: Mutex::new(HashMap::new()),
                wake: Notify::new(),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Creates an adapter from queue configuration.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.database.clone(), config.default_job_options.clone())
    }

    /// Adapter configuration.
    pub fn config(&self) -> &DatabaseAdapterConfig {
        &self.inner.config
    }

    /// Reset a terminally failed job so it is picked up again.
    ///
    /// Returns false if the job does not exist and fails with
    /// [`QueueError::InvalidState`] if it is not `failed`.
    pub async fn retry_job(&self, queue: &str, job_id: &JobId) -> QueueResult<bool> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;

        let Some(mut job) = store.get(queue, job_id).await? else {
            return Ok(false);
        };
        job.reset_for_retry(Utc::now())?;
        let saved = store.save(&job).await?;

        info!(queue = %queue, job_id = %job_id, "Failed job scheduled for retry");
        self.inner.wake.notify_one();
        Ok(saved)
    }

    /// Terminally failed jobs, newest first.
    pub async fn get_failed_jobs(&self, queue: &str, limit: usize, offset: usize) -> QueueResult<Vec<Job>> {
        self.get_jobs_by_status(queue, JobStatus::Failed, limit, offset).await
    }

    /// Jobs in `status`, newest first.
    pub async fn get_jobs_by_status(
        &self,
        queue: &str,
        status: JobStatus,
        limit: usize,
        offset: usize,
    ) -> QueueResult<Vec<Job>> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;
        store.list_by_status(queue, status, limit, offset, Utc::now()).await
    }

    /// Delete completed and failed jobs that finished more than `older_than`
    /// ago. Returns the number of rows removed.
    pub async fn cleanup_old_jobs(&self, queue: &str, older_than: Duration) -> QueueResult<u64> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;

        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let removed = store.delete_finished_before(queue, cutoff).await?;

        info!(queue = %queue, removed, "Old jobs cleaned up");
        Ok(removed)
    }

    /// Stored counts plus processing statistics for `queue`.
    pub async fn get_processing_metrics(&self, queue: &str) -> QueueResult<ProcessingMetrics> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;

        let mut info = QueueInfo::empty(queue);
        let mut recurring = 0;
        for (status, count) in store.count_by_status(queue, Utc::now()).await? {
            if status == JobStatus::Recurring {
                recurring += count;
            } else {
                info.record(status, count);
            }
        }

        let counters = self.inner.counters.lock().get(queue).cloned().unwrap_or_default();
        let concurrency = self
            .inner
            .registrations
            .read()
            .get(queue)
            .map(|registration| registration.concurrency);
        let finished = counters.processed + counters.failed + counters.retried;
        let average_duration_ms = (finished > 0)
            .then(|| counters.busy.as_secs_f64() * 1000.0 / finished as f64);

        Ok(ProcessingMetrics {
            queue: info,
            recurring,
            in_flight: counters.in_flight,
            concurrency,
            processed: counters.processed,
            failed: counters.failed,
            retried: counters.retried,
            average_duration_ms,
        })
    }

    /// Store a recurring template whose `process_after` is the next fire time
    /// of `cron_expression` (seconds-first, six or seven fields).
    ///
    /// Templates are stored and reported but never dispatched.
    pub async fn create_recurring_job(
        &self,
        queue: &str,
        cron_expression: &str,
        data: Value,
        options: JobOptions,
    ) -> QueueResult<JobReceipt> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;
        ensure_data(&data)?;
        options.validate()?;

        let schedule = Schedule::from_str(cron_expression).map_err(|e| {
            QueueError::invalid_argument(format!("invalid cron expression {cron_expression:?}: {e}"))
        })?;
        let next = schedule.upcoming(Utc).next().ok_or_else(|| {
            QueueError::invalid_argument(format!("cron expression {cron_expression:?} never fires"))
        })?;

        let mut job = Job::new(queue, data, options.merged_with(&self.inner.defaults), Utc::now());
        job.status = JobStatus::Recurring;
        job.process_after = next;
        store.insert(&job, Some(cron_expression)).await?;

        info!(queue = %queue, job_id = %job.id, cron = %cron_expression, next_run = %next, "Recurring job created");
        Ok(job.receipt())
    }
}

impl Inner {
    fn store(&self) -> QueueResult<Arc<dyn JobStore>> {
        ensure_initialized(self.initialized.load(Ordering::SeqCst))?;
        self.store.read().clone().ok_or(QueueError::NotInitialized)
    }

    fn with_counters(&self, queue: &str, update: impl FnOnce(&mut QueueCounters)) {
        update(self.counters.lock().entry(queue.to_string()).or_default());
    }

    async fn run_poller(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.poll_interval();
        debug!(interval_ms = self.config.poll_interval_ms, "Database poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(()) => {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = self.wake.notified() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(QueueError::NotInitialized) => break,
                Err(e) => {
                    error!(error = %e, "Database polling failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(interval * 2) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!("Database poller stopped");
    }

    async fn poll_once(&self) -> QueueResult<()> {
        let store = self.store()?;
        let registrations: Vec<(String, Registration)> = self
            .registrations
            .read()
            .iter()
            .map(|(queue, registration)| (queue.clone(), registration.clone()))
            .collect();

        let results = join_all(
            registrations
                .iter()
                .map(|(queue, registration)| self.poll_queue(&store, queue, registration)),
        )
        .await;

        for result in results {
            result?;
        }
        Ok(())
    }

    async fn poll_queue(
        &self,
        store: &Arc<dyn JobStore>,
        queue: &str,
        registration: &Registration,
    ) -> QueueResult<()> {
        let limit = registration.concurrency.min(self.config.max_concurrency);
        let jobs = store.claim(queue, limit, Utc::now()).await?;
        if jobs.is_empty() {
            return Ok(());
        }

        debug!(queue = %queue, claimed = jobs.len(), "Claimed jobs");
        let claimed = jobs.len();
        self.with_counters(queue, |c| c.in_flight += claimed);

        join_all(
            jobs.into_iter()
                .map(|job| self.process_claimed(store, &registration.processor, job)),
        )
        .await;
        Ok(())
    }

    async fn process_claimed(&self, store: &Arc<dyn JobStore>, processor: &Processor, claimed: Job) {
        let started = Instant::now();
        let outcome = run_processor(processor, claimed.clone()).await;
        let elapsed = started.elapsed();
        let queue = claimed.queue.clone();

        self.with_counters(&queue, |c| {
            c.in_flight = c.in_flight.saturating_sub(1);
            c.busy += elapsed;
        });

        // pick up updates made while the processor ran
        let mut job = match store.get(&queue, &claimed.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(queue = %queue, job_id = %claimed.id, "Job removed while processing");
                return;
            }
            Err(e) => {
                warn!(queue = %queue, job_id = %claimed.id, error = %e, "Could not reload job");
                claimed
            }
        };

        let now = Utc::now();
        match outcome {
            Ok(result) => {
                job.complete(result, now);
                JobMetrics::completed(&queue, elapsed);
                self.with_counters(&queue, |c| c.processed += 1);
                debug!(queue = %queue, job_id = %job.id, "Job completed");
            }
            Err(message) => match job.fail(message, now) {
                FailureOutcome::Retry { delay } => {
                    JobMetrics::retried(&queue, elapsed);
                    self.with_counters(&queue, |c| c.retried += 1);
                    warn!(
                        queue = %queue,
                        job_id = %job.id,
                        attempt = job.attempts,
                        error = job.error.as_deref().unwrap_or_default(),
                        delay_ms = delay.as_millis() as u64,
                        "Job failed, will retry"
                    );
                }
                FailureOutcome::Terminal => {
                    JobMetrics::failed(&queue, elapsed);
                    self.with_counters(&queue, |c| c.failed += 1);
                    error!(
                        queue = %queue,
                        job_id = %job.id,
                        attempts = job.attempts,
                        error = job.error.as_deref().unwrap_or_default(),
                        "Job failed permanently"
                    );
                }
            },
        }

        let persisted = if job.should_remove() {
            store.delete(&queue, &job.id).await.map(|_| ())
        } else {
            store.save(&job).await.map(|_| ())
        };
        if let Err(e) = persisted {
            error!(queue = %queue, job_id = %job.id, error = %e, "Failed to record job outcome");
        }
    }
}

#[async_trait]
impl QueueAdapter for DatabaseAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Database
    }

    fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> QueueResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let config = &self.inner.config;
        config.validate()?;

        let store = self
            .inner
            .registry
            .connect(&config.database_type, &config.connection, &config.table_name)
            .await?;
        store.ensure_schema().await?;
        *self.inner.store.write() = Some(store);
        self.inner.initialized.store(true, Ordering::SeqCst);

        let (shutdown, receiver) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.inner).run_poller(receiver));
        *self.inner.poller.lock() = Some(Poller { shutdown, handle });

        info!(
            database_type = %config.database_type,
            table = %config.table_name,
            poll_interval_ms = config.poll_interval_ms,
            "Database queue adapter initialized"
        );
        Ok(())
    }

    async fn add_job(&self, queue: &str, data: Value, options: JobOptions) -> QueueResult<JobReceipt> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;
        ensure_data(&data)?;
        options.validate()?;

        let job = Job::new(queue, data, options.merged_with(&self.inner.defaults), Utc::now());
        store.insert(&job, None).await?;

        JobMetrics::added(queue);
        debug!(queue = %queue, job_id = %job.id, status = %job.status, "Job added");
        self.inner.wake.notify_one();
        Ok(job.receipt())
    }

    async fn process_jobs(
        &self,
        queue: &str,
        processor: Processor,
        options: ProcessOptions,
    ) -> QueueResult<()> {
        self.inner.store()?;
        ensure_queue_name(queue)?;
        options.validate()?;

        let replaced = self
            .inner
            .registrations
            .write()
            .insert(
                queue.to_string(),
                Registration {
                    processor,
                    concurrency: options.concurrency,
                },
            )
            .is_some();

        if replaced {
            warn!(queue = %queue, "Replacing existing processor");
        }
        info!(queue = %queue, concurrency = options.concurrency, "Processor registered");
        self.inner.wake.notify_one();
        Ok(())
    }

    async fn get_job(&self, queue: &str, job_id: &JobId) -> QueueResult<Option<Job>> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;
        store.get(queue, job_id).await
    }

    async fn update_job(&self, queue: &str, job_id: &JobId, update: JobUpdate) -> QueueResult<bool> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;
        update.validate()?;

        let Some(mut job) = store.get(queue, job_id).await? else {
            return Ok(false);
        };
        let effect = job.apply_update(&update, Utc::now())?;
        // A poller may claim the job between the read and this write.
        let saved = store.update_fields(&job, effect.schedule_changed).await?;

        debug!(queue = %queue, job_id = %job_id, "Job updated");
        if effect.priority_changed || effect.schedule_changed {
            self.inner.wake.notify_one();
        }
        Ok(saved)
    }

    async fn remove_job(&self, queue: &str, job_id: &JobId) -> QueueResult<bool> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;

        let removed = store.delete(queue, job_id).await?;
        if removed {
            debug!(queue = %queue, job_id = %job_id, "Job removed");
        }
        Ok(removed)
    }

    async fn get_queue_info(&self, queue: &str) -> QueueResult<QueueInfo> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;

        let mut info = QueueInfo::empty(queue);
        for (status, count) in store.count_by_status(queue, Utc::now()).await? {
            info.record(status, count);
        }
        Ok(info)
    }

    async fn clear_queue(&self, queue: &str) -> QueueResult<bool> {
        let store = self.inner.store()?;
        ensure_queue_name(queue)?;

        let removed = store.clear(queue).await?;
        info!(queue = %queue, removed, "Queue cleared");
        Ok(true)
    }

    async fn stop(&self) -> QueueResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if !self.inner.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let poller = self.inner.poller.lock().take();
        if let Some(poller) = poller {
            let _ = poller.shutdown.send(true);
            if let Err(e) = poller.handle.await {
                warn!(error = %e, "Database poller ended abnormally");
            }
        }

        let store = self.inner.store.write().take();
        if let Some(store) = store {
            store.close().await;
        }
        self.inner.registrations.write().clear();
        self.inner.counters.lock().clear();

        info!("Database queue adapter stopped");
        Ok(())
    }
}
