//! Redis queue adapter.

use super::native::{NativeJob, NativeState};
use super::{create_pool, priority_score, RedisKeys};
use crate::adapter::{
    ensure_initialized, run_processor, ProcessOptions, Processor, QueueAdapter, QueueInfo,
};
use crate::config::{AdapterKind, QueueConfig, RedisAdapterConfig};
use crate::error::{ensure_queue_name, QueueError, QueueResult};
use crate::job::{ensure_data, FailureOutcome, Job, JobId, JobOptions, JobReceipt, JobStatus, JobUpdate};
use crate::metrics::JobMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Connection, Pool};
use parking_lot::{Mutex, RwLock};
use redis::AsyncCommands;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Queue adapter backed by Redis.
#[derive(Clone)]
pub struct RedisAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    config: RedisAdapterConfig,
    defaults: JobOptions,
    keys: RedisKeys,
    initialized: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    pool: RwLock<Option<Pool>>,
    workers: Mutex<HashMap<String, Worker>>,
}

struct Worker {
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Give up on a read-modify-write after this many conflicting writers.
const MAX_WRITE_ATTEMPTS: usize = 16;

/// Replace a job record only if it still holds the value it was read as.
///
/// KEYS: jobs hash, wait, delayed, and optionally the set to re-index into.
/// ARGV: id, expected record, replacement, score for the re-index.
/// A job is re-indexed only if it was still in `wait` or `delayed`, so a job
/// a worker has just popped is not put back.
///
/// Returns 1 when written, 0 when the job is gone, -1 when it changed.
const WRITE_IF_UNCHANGED_SCRIPT: &str = r#"
    local current = redis.call('HGET', KEYS[1], ARGV[1])
    if not current then
        return 0
    end
    if current ~= ARGV[2] then
        return -1
    end
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
    if KEYS[4] then
        local indexed = redis.call('ZREM', KEYS[2], ARGV[1]) + redis.call('ZREM', KEYS[3], ARGV[1])
        if indexed > 0 then
            redis.call('ZADD', KEYS[4], ARGV[4], ARGV[1])
        end
    end
    return 1
"#;

enum WriteOutcome {
    Written,
    Missing,
    Changed,
}

async fn load(conn: &mut Connection, keys: &RedisKeys, queue: &str, id: &str) -> QueueResult<Option<NativeJob>> {
    Ok(load_raw(conn, keys, queue, id).await?.map(|(_, native)| native))
}

/// Like [`load`], also returning the stored text for [`write_if_unchanged`].
async fn load_raw(
    conn: &mut Connection,
    keys: &RedisKeys,
    queue: &str,
    id: &str,
) -> QueueResult<Option<(String, NativeJob)>> {
    let raw: Option<String> = conn.hget(keys.jobs(queue), id).await?;
    raw.map(|raw| -> QueueResult<(String, NativeJob)> {
        let native = serde_json::from_str::<NativeJob>(&raw)?;
        Ok((raw, native))
    })
    .transpose()
}

async fn write_if_unchanged(
    conn: &mut Connection,
    keys: &RedisKeys,
    expected: &str,
    native: &NativeJob,
    reindex: Option<(String, f64)>,
) -> QueueResult<WriteOutcome> {
    let queue = native.name.as_str();
    let script = redis::Script::new(WRITE_IF_UNCHANGED_SCRIPT);
    let mut invocation = script.prepare_invoke();
    invocation
        .key(keys.jobs(queue))
        .key(keys.wait(queue))
        .key(keys.delayed(queue))
        .arg(&native.id)
        .arg(expected)
        .arg(serde_json::to_string(native)?);
    if let Some((set, score)) = reindex {
        invocation.key(set).arg(score);
    }

    let result: i64 = invocation.invoke_async(&mut **conn).await?;
    Ok(match result {
        1 => WriteOutcome::Written,
        0 => WriteOutcome::Missing,
        _ => WriteOutcome::Changed,
    })
}

/// Key of the set a job in `state` is indexed in, with its score.
fn index_entry(keys: &RedisKeys, native: &NativeJob, now: DateTime<Utc>) -> Option<(String, f64)> {
    let queue = native.name.as_str();
    let now_ms = now.timestamp_millis() as f64;
    match native.state {
        NativeState::Waiting => Some((
            keys.wait(queue),
            priority_score(native.opts.priority, native.timestamp),
        )),
        NativeState::Delayed => Some((keys.delayed(queue), native.delay_until as f64)),
        NativeState::Completed => Some((keys.completed(queue), now_ms)),
        NativeState::Failed => Some((keys.failed(queue), now_ms)),
        NativeState::Active => None,
    }
}

impl RedisAdapter {
    /// Creates an adapter; `defaults` are merged into every job's options.
    pub fn new(config: RedisAdapterConfig, defaults: JobOptions) -> Self {
        let keys = RedisKeys::new(&config.prefix);
        Self {
            inner: Arc::new(Inner {
                config,
                defaults,
                keys,
                initialized: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                pool: RwLock::new(None),
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates an adapter from queue configuration.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.redis.clone(), config.redis_job_options())
    }

    /// Key builder in use.
    pub fn keys(&self) -> &RedisKeys {
        &self.inner.keys
    }

    /// Stop handing out jobs from `queue`. Running jobs finish normally and
    /// new jobs are still accepted.
    pub async fn pause_queue(&self, queue: &str) -> QueueResult<()> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;

        let mut conn = pool.get().await?;
        let _: () = conn.set(self.inner.keys.paused(queue), 1).await?;
        info!(queue = %queue, "Queue paused");
        Ok(())
    }

    /// Resume a paused queue.
    pub async fn resume_queue(&self, queue: &str) -> QueueResult<()> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;

        let mut conn = pool.get().await?;
        let _: () = conn.del(self.inner.keys.paused(queue)).await?;
        info!(queue = %queue, "Queue resumed");
        self.inner.wake(queue);
        Ok(())
    }

    /// Whether `queue` is paused.
    pub async fn is_paused(&self, queue: &str) -> QueueResult<bool> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;

        let mut conn = pool.get().await?;
        Ok(conn.exists(self.inner.keys.paused(queue)).await?)
    }

    /// Terminally failed jobs, most recent failure first.
    pub async fn get_failed_jobs(&self, queue: &str, limit: usize, offset: usize) -> QueueResult<Vec<Job>> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let keys = &self.inner.keys;
        let mut conn = pool.get().await?;
        let start = isize::try_from(offset).unwrap_or(isize::MAX);
        let stop = start.saturating_add(isize::try_from(limit).unwrap_or(isize::MAX) - 1);
        let ids: Vec<String> = conn.zrevrange(keys.failed(queue), start, stop).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(native) = load(&mut conn, keys, queue, &id).await? {
                jobs.push(native.into_job()?);
            }
        }
        Ok(jobs)
    }

    /// Delete `completed` or `failed` jobs that finished more than `grace`
    /// ago. Returns the number removed.
    pub async fn clean_up(&self, queue: &str, grace: Duration, status: JobStatus) -> QueueResult<u64> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;

        let keys = &self.inner.keys;
        let set = match status {
            JobStatus::Completed => keys.completed(queue),
            JobStatus::Failed => keys.failed(queue),
            other => {
                return Err(QueueError::invalid_argument(format!(
                    "clean_up only supports completed or failed jobs, got {other}"
                )))
            }
        };

        let grace_ms = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(grace_ms);

        let mut conn = pool.get().await?;
        let ids: Vec<String> = conn.zrangebyscore(&set, "-inf", cutoff).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let _: () = redis::pipe()
            .atomic()
            .zrem(&set, &ids)
            .ignore()
            .hdel(keys.jobs(queue), &ids)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        let removed = ids.len() as u64;
        info!(queue = %queue, status = %status, removed, "Finished jobs cleaned up");
        Ok(removed)
    }
}

impl Inner {
    fn pool(&self) -> QueueResult<Pool> {
        ensure_initialized(self.initialized.load(Ordering::SeqCst))?;
        self.pool.read().clone().ok_or(QueueError::NotInitialized)
    }

    fn wake(&self, queue: &str) {
        if let Some(worker) = self.workers.lock().get(queue) {
            worker.wake.notify_one();
        }
    }

    /// Write a job and index it in the set matching its state.
    async fn store(&self, conn: &mut Connection, job: &Job) -> QueueResult<()> {
        let now = Utc::now();
        let native = NativeJob::from_job(job, now)?;
        let queue = job.queue.as_str();
        let id = native.id.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(self.keys.jobs(queue), &id, serde_json::to_string(&native)?)
            .ignore();
        if let Some((set, score)) = index_entry(&self.keys, &native, now) {
            pipe.zadd(set, &id, score).ignore();
        }
        let _: () = pipe.query_async(&mut **conn).await?;
        Ok(())
    }

    /// Move due delayed jobs to the wait list.
    async fn promote_due(&self, conn: &mut Connection, queue: &str) -> QueueResult<()> {
        let delayed_key = self.keys.delayed(queue);
        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn.zrangebyscore(&delayed_key, "-inf", now_ms).await?;

        for id in due {
            // another worker may have promoted it already
            let removed: u64 = conn.zrem(&delayed_key, &id).await?;
            if removed == 0 {
                continue;
            }
            self.promote(conn, queue, &id, now_ms).await?;
        }
        Ok(())
    }

    /// Mark a job taken off the delayed set as waiting and index it again.
    async fn promote(&self, conn: &mut Connection, queue: &str, id: &str, now_ms: i64) -> QueueResult<()> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some((raw, mut native)) = load_raw(conn, &self.keys, queue, id).await? else {
                return Ok(());
            };
            // rescheduled into the future since it was due
            let (state, set, score) = if native.delay_until > now_ms {
                (NativeState::Delayed, self.keys.delayed(queue), native.delay_until as f64)
            } else {
                let score = priority_score(native.opts.priority, native.timestamp);
                (NativeState::Waiting, self.keys.wait(queue), score)
            };
            native.state = state;

            match write_if_unchanged(conn, &self.keys, &raw, &native, None).await? {
                WriteOutcome::Written => {
                    let _: () = conn.zadd(set, id, score).await?;
                    debug!(queue = %queue, job_id = %id, state = ?state, "Delayed job re-indexed");
                    return Ok(());
                }
                WriteOutcome::Missing => return Ok(()),
                WriteOutcome::Changed => continue,
            }
        }
        Err(QueueError::Internal(format!("job {id} kept changing while being promoted")))
    }

    /// Pop the best waiting job and mark it active.
    async fn next_job(&self, pool: &Pool, queue: &str) -> QueueResult<Option<Job>> {
        let mut conn = pool.get().await?;

        let paused: bool = conn.exists(self.keys.paused(queue)).await?;
        if paused {
            return Ok(None);
        }
        self.promote_due(&mut conn, queue).await?;

        let popped: Vec<(String, f64)> = conn.zpopmin(self.keys.wait(queue), 1).await?;
        let Some((id, _)) = popped.into_iter().next() else {
            return Ok(None);
        };

        // the job is ours once popped; only concurrent updates can interfere
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some((raw, native)) = load_raw(&mut conn, &self.keys, queue, &id).await? else {
                return Ok(None);
            };

            let mut job = native.into_job()?;
            let now = Utc::now();
            job.begin_attempt(now);
            let native = NativeJob::from_job(&job, now)?;

            match write_if_unchanged(&mut conn, &self.keys, &raw, &native, None).await? {
                WriteOutcome::Written => {
                    let _: () = conn.sadd(self.keys.active(queue), &id).await?;
                    return Ok(Some(job));
                }
                WriteOutcome::Missing => return Ok(None),
                WriteOutcome::Changed => continue,
            }
        }
        Err(QueueError::Internal(format!("job {id} kept changing while being started")))
    }

    /// Record an attempt's outcome on the stored job.
    async fn finish(&self, pool: &Pool, claimed: &Job, outcome: Result<Value, String>, elapsed: Duration) -> QueueResult<()> {
        let queue = claimed.queue.as_str();
        let id = claimed.id.as_str();
        let mut conn = pool.get().await?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some((raw, native)) = load_raw(&mut conn, &self.keys, queue, id).await? else {
                let _: () = conn.srem(self.keys.active(queue), id).await?;
                debug!(queue = %queue, job_id = %id, "Job removed while processing");
                return Ok(());
            };
            let mut job = native.into_job()?;
            let now = Utc::now();
            let failure = match &outcome {
                Ok(result) => {
                    job.complete(result.clone(), now);
                    None
                }
                Err(message) => Some(job.fail(message.clone(), now)),
            };

            if job.should_remove() {
                let _: () = redis::pipe()
                    .atomic()
                    .hdel(self.keys.jobs(queue), id)
                    .ignore()
                    .srem(self.keys.active(queue), id)
                    .ignore()
                    .query_async(&mut *conn)
                    .await?;
            } else {
                let native = NativeJob::from_job(&job, now)?;
                match write_if_unchanged(&mut conn, &self.keys, &raw, &native, None).await? {
                    WriteOutcome::Written => {}
                    WriteOutcome::Missing => {
                        let _: () = conn.srem(self.keys.active(queue), id).await?;
                        return Ok(());
                    }
                    WriteOutcome::Changed => continue,
                }
                let mut pipe = redis::pipe();
                pipe.atomic().srem(self.keys.active(queue), id).ignore();
                if let Some((set, score)) = index_entry(&self.keys, &native, now) {
                    pipe.zadd(set, id, score).ignore();
                }
                let _: () = pipe.query_async(&mut *conn).await?;
            }

            Self::record_outcome(&job, failure, elapsed);
            return Ok(());
        }
        Err(QueueError::Internal(format!("job {id} kept changing while being finished")))
    }

    fn record_outcome(job: &Job, failure: Option<FailureOutcome>, elapsed: Duration) {
        let queue = job.queue.as_str();
        let id = job.id.as_str();
        match failure {
            None => {
                JobMetrics::completed(queue, elapsed);
                debug!(queue = %queue, job_id = %id, "Job completed");
            }
            Some(FailureOutcome::Retry { delay }) => {
                JobMetrics::retried(queue, elapsed);
                warn!(
                    queue = %queue,
                    job_id = %id,
                    attempt = job.attempts,
                    error = job.error.as_deref().unwrap_or_default(),
                    delay_ms = delay.as_millis() as u64,
                    "Job failed, will retry"
                );
            }
            Some(FailureOutcome::Terminal) => {
                JobMetrics::failed(queue, elapsed);
                error!(
                    queue = %queue,
                    job_id = %id,
                    attempts = job.attempts,
                    error = job.error.as_deref().unwrap_or_default(),
                    "Job failed permanently"
                );
            }
        }
    }

    async fn run_job(&self, pool: Pool, processor: Processor, job: Job) {
        let started = Instant::now();
        let outcome = run_processor(&processor, job.clone()).await;
        if let Err(e) = self.finish(&pool, &job, outcome, started.elapsed()).await {
            error!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to record job outcome");
        }
    }

    async fn run_worker(self: Arc<Self>, queue: String, processor: Processor, concurrency: usize, wake: Arc<Notify>) {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let interval = self.config.poll_interval();
        debug!(queue = %queue, concurrency, "Redis worker started");

        loop {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let Ok(pool) = self.pool() else {
                break;
            };

            match self.next_job(&pool, &queue).await {
                Ok(Some(job)) => {
                    debug!(queue = %queue, job_id = %job.id, attempt = job.attempts, "Processing job");
                    let inner = Arc::clone(&self);
                    let processor = Arc::clone(&processor);
                    tokio::spawn(async move {
                        inner.run_job(pool, processor, job).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    error!(queue = %queue, error = %e, "Redis worker error, backing off");
                    tokio::time::sleep(interval * 2).await;
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake.notified() => {}
            }
        }

        debug!(queue = %queue, "Redis worker stopped");
    }
}

#[async_trait]
impl QueueAdapter for RedisAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Redis
    }

    fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> QueueResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        self.inner.config.validate()?;
        let pool = create_pool(&self.inner.config).await?;
        *self.inner.pool.write() = Some(pool);
        self.inner.initialized.store(true, Ordering::SeqCst);

        info!(prefix = %self.inner.config.prefix, "Redis queue adapter initialized");
        Ok(())
    }

    async fn add_job(&self, queue: &str, data: Value, options: JobOptions) -> QueueResult<JobReceipt> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;
        ensure_data(&data)?;
        options.validate()?;

        let mut job = Job::new(queue, data, options.merged_with(&self.inner.defaults), Utc::now());
        let mut conn = pool.get().await?;
        let id: u64 = conn.incr(self.inner.keys.id(queue), 1).await?;
        job.id = JobId::from(id.to_string());
        self.inner.store(&mut conn, &job).await?;

        JobMetrics::added(queue);
        debug!(queue = %queue, job_id = %job.id, status = %job.status, "Job added");
        self.inner.wake(queue);
        Ok(job.receipt())
    }

    async fn process_jobs(
        &self,
        queue: &str,
        processor: Processor,
        options: ProcessOptions,
    ) -> QueueResult<()> {
        self.inner.pool()?;
        ensure_queue_name(queue)?;
        options.validate()?;

        let wake = Arc::new(Notify::new());
        let handle = tokio::spawn(Arc::clone(&self.inner).run_worker(
            queue.to_string(),
            processor,
            options.concurrency,
            Arc::clone(&wake),
        ));

        let previous = self
            .inner
            .workers
            .lock()
            .insert(queue.to_string(), Worker { wake, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
            warn!(queue = %queue, "Replacing existing processor");
        }

        info!(queue = %queue, concurrency = options.concurrency, "Processor registered");
        Ok(())
    }

    async fn get_job(&self, queue: &str, job_id: &JobId) -> QueueResult<Option<Job>> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;

        let mut conn = pool.get().await?;
        load(&mut conn, &self.inner.keys, queue, job_id.as_str())
            .await?
            .map(NativeJob::into_job)
            .transpose()
    }

    async fn update_job(&self, queue: &str, job_id: &JobId, update: JobUpdate) -> QueueResult<bool> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;
        update.validate()?;

        let keys = &self.inner.keys;
        let id = job_id.as_str();
        let mut conn = pool.get().await?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some((raw, native)) = load_raw(&mut conn, keys, queue, id).await? else {
                return Ok(false);
            };
            let waiting = matches!(native.state, NativeState::Waiting | NativeState::Delayed);
            let mut job = native.into_job()?;
            let now = Utc::now();
            let effect = job.apply_update(&update, now)?;
            let updated = NativeJob::from_job(&job, now)?;

            // re-index under the new score
            let reindex = if waiting && (effect.priority_changed || effect.schedule_changed) {
                index_entry(keys, &updated, now)
            } else {
                None
            };

            match write_if_unchanged(&mut conn, keys, &raw, &updated, reindex).await? {
                WriteOutcome::Written => {
                    debug!(queue = %queue, job_id = %job_id, "Job updated");
                    self.inner.wake(queue);
                    return Ok(true);
                }
                WriteOutcome::Missing => return Ok(false),
                WriteOutcome::Changed => {
                    debug!(queue = %queue, job_id = %job_id, "Job changed during update, retrying");
                }
            }
        }
        Err(QueueError::Internal(format!("job {id} kept changing during update")))
    }

    async fn remove_job(&self, queue: &str, job_id: &JobId) -> QueueResult<bool> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;

        let keys = &self.inner.keys;
        let id = job_id.as_str();
        let mut conn = pool.get().await?;

        let (removed,): (u64,) = redis::pipe()
            .atomic()
            .hdel(keys.jobs(queue), id)
            .zrem(keys.wait(queue), id)
            .ignore()
            .zrem(keys.delayed(queue), id)
            .ignore()
            .zrem(keys.completed(queue), id)
            .ignore()
            .zrem(keys.failed(queue), id)
            .ignore()
            .srem(keys.active(queue), id)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        if removed > 0 {
            debug!(queue = %queue, job_id = %job_id, "Job removed");
        }
        Ok(removed > 0)
    }

    async fn get_queue_info(&self, queue: &str) -> QueueResult<QueueInfo> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;

        let keys = &self.inner.keys;
        let mut conn = pool.get().await?;
        let (pending, delayed, processing, completed, failed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .atomic()
                .zcard(keys.wait(queue))
                .zcard(keys.delayed(queue))
                .scard(keys.active(queue))
                .zcard(keys.completed(queue))
                .zcard(keys.failed(queue))
                .query_async(&mut *conn)
                .await?;

        let mut info = QueueInfo::empty(queue);
        info.record(JobStatus::Pending, pending);
        info.record(JobStatus::Delayed, delayed);
        info.record(JobStatus::Processing, processing);
        info.record(JobStatus::Completed, completed);
        info.record(JobStatus::Failed, failed);
        Ok(info)
    }

    async fn clear_queue(&self, queue: &str) -> QueueResult<bool> {
        let pool = self.inner.pool()?;
        ensure_queue_name(queue)?;

        let mut conn = pool.get().await?;
        let _: () = conn.del(self.inner.keys.job_keys(queue)).await?;
        info!(queue = %queue, "Queue cleared");
        Ok(true)
    }

    async fn stop(&self) -> QueueResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if !self.inner.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        for (_, worker) in self.inner.workers.lock().drain() {
            worker.handle.abort();
        }
        // running jobs keep their own pool handle until they finish
        self.inner.pool.write().take();

        info!("Redis queue adapter stopped");
        Ok(())
    }
}
