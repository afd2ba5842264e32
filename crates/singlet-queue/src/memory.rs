//! In-process adapter.
//!
//! Jobs live in a map keyed by queue name. Each queue with a registered
//! processor keeps up to `concurrency` jobs in flight; a job finishing, a job
//! being added or a delay timer firing all trigger another drain of the
//! queue. Nothing survives the process.

use crate::adapter::{
    ensure_initialized, run_processor, ProcessOptions, Processor, QueueAdapter, QueueInfo,
};
use crate::config::{AdapterKind, QueueConfig};
use crate::error::{ensure_queue_name, QueueResult};
use crate::job::{ensure_data, FailureOutcome, Job, JobId, JobOptions, JobReceipt, JobStatus, JobUpdate};
use crate::metrics::JobMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// In-memory queue adapter.
#[derive(Clone)]
pub struct MemoryAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    defaults: JobOptions,
    initialized: AtomicBool,
    next_timer: AtomicU64,
    /// Bumped by `stop`; attempts started under an older value are discarded.
    generation: AtomicU64,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    queues: HashMap<String, Vec<Job>>,
    registrations: HashMap<String, Registration>,
    in_flight: HashMap<String, usize>,
    timers: HashMap<JobId, DelayTimer>,
}

struct Registration {
    processor: Processor,
    concurrency: usize,
}

struct DelayTimer {
    token: u64,
    queue: String,
    handle: JoinHandle<()>,
}

impl MemoryAdapter {
    /// Creates an adapter that merges `defaults` into every job's options.
    pub fn new(defaults: JobOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                defaults,
                initialized: AtomicBool::new(false),
                next_timer: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                state: Mutex::new(MemoryState::default()),
            }),
        }
    }

    /// Creates an adapter from queue configuration.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.default_job_options.clone())
    }

    fn ensure_ready(&self) -> QueueResult<()> {
        ensure_initialized(self.inner.initialized.load(Ordering::SeqCst))
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new(JobOptions::default())
    }
}

impl Inner {
    /// Schedule `on_timer` for `job_id` at `at`, replacing any earlier timer.
    fn arm_timer(self: &Arc<Self>, state: &mut MemoryState, queue: &str, job_id: &JobId, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let token = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(self);
        let (timer_queue, timer_id) = (queue.to_string(), job_id.clone());

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_timer(&timer_queue, &timer_id, token);
        });

        let timer = DelayTimer {
            token,
            queue: queue.to_string(),
            handle,
        };
        if let Some(previous) = state.timers.insert(job_id.clone(), timer) {
            previous.handle.abort();
        }
    }

    fn cancel_timer(state: &mut MemoryState, job_id: &JobId) {
        if let Some(timer) = state.timers.remove(job_id) {
            timer.handle.abort();
        }
    }

    fn on_timer(self: &Arc<Self>, queue: &str, job_id: &JobId, token: u64) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            match state.timers.get(job_id) {
                Some(timer) if timer.token == token => {
                    state.timers.remove(job_id);
                }
                _ => return,
            }

            let now = Utc::now();
            if let Some(job) = state
                .queues
                .get_mut(queue)
                .and_then(|jobs| jobs.iter_mut().find(|j| &j.id == job_id))
            {
                if matches!(job.status, JobStatus::Delayed | JobStatus::Pending) {
                    job.status = JobStatus::Pending;
                    if job.process_after > now {
                        job.process_after = now;
                    }
                    debug!(queue = %queue, job_id = %job_id, "Delayed job is now eligible");
                }
            }
        }
        self.drain(queue);
    }

    /// Start eligible jobs until the queue's concurrency is used up.
    fn drain(self: &Arc<Self>, queue: &str) {
        loop {
            let (job, processor, generation) = {
                let mut guard = self.state.lock();
                let state = &mut *guard;

                if !self.initialized.load(Ordering::SeqCst) {
                    return;
                }
                let Some(registration) = state.registrations.get(queue) else {
                    return;
                };
                let in_flight = state.in_flight.get(queue).copied().unwrap_or(0);
                if in_flight >= registration.concurrency {
                    return;
                }
                let processor = Arc::clone(&registration.processor);

                let now = Utc::now();
                let Some(jobs) = state.queues.get_mut(queue) else {
                    return;
                };
                let Some(job) = jobs
                    .iter_mut()
                    .filter(|j| j.is_eligible(now))
                    .min_by(|a, b| a.dequeue_cmp(b))
                else {
                    return;
                };

                job.begin_attempt(now);
                let snapshot = job.clone();
                *state.in_flight.entry(queue.to_string()).or_default() += 1;
                (snapshot, processor, self.generation.load(Ordering::SeqCst))
            };

            debug!(queue = %queue, job_id = %job.id, attempt = job.attempts, "Processing job");

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let started = Instant::now();
                let outcome = run_processor(&processor, job.clone()).await;
                inner.finish(generation, &job, outcome, started.elapsed());
            });
        }
    }

    /// Record an attempt's outcome, then look for more work.
    fn finish(
        self: &Arc<Self>,
        generation: u64,
        snapshot: &Job,
        outcome: Result<Value, String>,
        elapsed: Duration,
    ) {
        let queue = snapshot.queue.as_str();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(queue = %queue, job_id = %snapshot.id, "Discarding outcome of a job started before stop");
                return;
            }

            if let Some(count) = state.in_flight.get_mut(queue) {
                *count = count.saturating_sub(1);
            }

            let Some(jobs) = state.queues.get_mut(queue) else {
                return;
            };
            let Some(position) = jobs.iter().position(|j| j.id == snapshot.id) else {
                debug!(queue = %queue, job_id = %snapshot.id, "Job removed while processing");
                drop(guard);
                self.drain(queue);
                return;
            };

            let now = Utc::now();
            let job = &mut jobs[position];
            let mut retry_at = None;

            match outcome {
                Ok(result) => {
                    job.complete(result, now);
                    JobMetrics::completed(queue, elapsed);
                    debug!(queue = %queue, job_id = %job.id, "Job completed");
                }
                Err(message) => match job.fail(message, now) {
                    FailureOutcome::Retry { delay } => {
                        JobMetrics::retried(queue, elapsed);
                        warn!(
                            queue = %queue,
                            job_id = %job.id,
                            attempt = job.attempts,
                            error = job.error.as_deref().unwrap_or_default(),
                            delay_ms = delay.as_millis() as u64,
                            "Job failed, will retry"
                        );
                        if job.process_after > now {
                            job.status = JobStatus::Delayed;
                        }
                        retry_at = Some(job.process_after);
                    }
                    FailureOutcome::Terminal => {
                        JobMetrics::failed(queue, elapsed);
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

            if job.should_remove() {
                jobs.remove(position);
            } else if let Some(at) = retry_at {
                let job_id = snapshot.id.clone();
                self.arm_timer(state, queue, &job_id, at);
            }
        }
        self.drain(queue);
    }
}

#[async_trait]
impl QueueAdapter for MemoryAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Memory
    }

    fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> QueueResult<()> {
        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            info!("Memory queue adapter initialized");
        }
        Ok(())
    }

    async fn add_job(&self, queue: &str, data: Value, options: JobOptions) -> QueueResult<JobReceipt> {
        self.ensure_ready()?;
        ensure_queue_name(queue)?;
        ensure_data(&data)?;
        options.validate()?;

        let options = options.merged_with(&self.inner.defaults);
        let job = Job::new(queue, data, options, Utc::now());
        let receipt = job.receipt();

        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if job.status == JobStatus::Delayed {
                self.inner.arm_timer(state, queue, &job.id, job.process_after);
            }
            state.queues.entry(queue.to_string()).or_default().push(job);
        }

        JobMetrics::added(queue);
        debug!(queue = %queue, job_id = %receipt.id, status = %receipt.status, "Job added");

        self.inner.drain(queue);
        Ok(receipt)
    }

    async fn process_jobs(
        &self,
        queue: &str,
        processor: Processor,
        options: ProcessOptions,
    ) -> QueueResult<()> {
        self.ensure_ready()?;
        ensure_queue_name(queue)?;
        options.validate()?;

        let replaced = self
            .inner
            .state
            .lock()
            .registrations
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

        self.inner.drain(queue);
        Ok(())
    }

    async fn get_job(&self, queue: &str, job_id: &JobId) -> QueueResult<Option<Job>> {
        self.ensure_ready()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;

        let state = self.inner.state.lock();
        Ok(state
            .queues
            .get(queue)
            .and_then(|jobs| jobs.iter().find(|j| &j.id == job_id))
            .cloned())
    }

    async fn update_job(&self, queue: &str, job_id: &JobId, update: JobUpdate) -> QueueResult<bool> {
        self.ensure_ready()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;
        update.validate()?;

        let effect = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            let Some(job) = state
                .queues
                .get_mut(queue)
                .and_then(|jobs| jobs.iter_mut().find(|j| &j.id == job_id))
            else {
                return Ok(false);
            };

            let effect = job.apply_update(&update, Utc::now())?;
            let delayed_until = (job.status == JobStatus::Delayed).then_some(job.process_after);

            if effect.schedule_changed {
                match delayed_until {
                    Some(at) => self.inner.arm_timer(state, queue, job_id, at),
                    None => Inner::cancel_timer(state, job_id),
                }
            }
            effect
        };

        debug!(queue = %queue, job_id = %job_id, "Job updated");
        if effect.priority_changed || effect.schedule_changed {
            self.inner.drain(queue);
        }
        Ok(true)
    }

    async fn remove_job(&self, queue: &str, job_id: &JobId) -> QueueResult<bool> {
        self.ensure_ready()?;
        ensure_queue_name(queue)?;
        job_id.ensure_valid()?;

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let Some(jobs) = state.queues.get_mut(queue) else {
            return Ok(false);
        };
        let Some(position) = jobs.iter().position(|j| &j.id == job_id) else {
            return Ok(false);
        };

        jobs.remove(position);
        Inner::cancel_timer(state, job_id);
        debug!(queue = %queue, job_id = %job_id, "Job removed");
        Ok(true)
    }

    async fn get_queue_info(&self, queue: &str) -> QueueResult<QueueInfo> {
        self.ensure_ready()?;
        ensure_queue_name(queue)?;

        let state = self.inner.state.lock();
        let mut info = QueueInfo::empty(queue);
        for job in state.queues.get(queue).into_iter().flatten() {
            info.record(job.status, 1);
        }
        Ok(info)
    }

    async fn clear_queue(&self, queue: &str) -> QueueResult<bool> {
        self.ensure_ready()?;
        ensure_queue_name(queue)?;

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let removed = state.queues.remove(queue).map_or(0, |jobs| jobs.len());
        state.timers.retain(|_, timer| {
            if timer.queue == queue {
                timer.handle.abort();
                false
            } else {
                true
            }
        });

        info!(queue = %queue, removed, "Queue cleared");
        Ok(true)
    }

    async fn stop(&self) -> QueueResult<()> {
        self.inner.initialized.store(false, Ordering::SeqCst);

        let mut state = self.inner.state.lock();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        for (_, timer) in state.timers.drain() {
            timer.handle.abort();
        }
        state.queues.clear();
        state.registrations.clear();
        state.in_flight.clear();

        info!("Memory queue adapter stopped");
        Ok(())
    }
}
