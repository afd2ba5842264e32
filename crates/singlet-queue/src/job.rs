//! Job entity, options and the state transitions shared by every adapter.

use crate::backoff::{backoff_delay, BackoffOptions};
use crate::error::{QueueError, QueueResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Attempts ceiling applied when neither the job nor the adapter sets one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fails with an invalid-argument error for an empty id.
    pub(crate) fn ensure_valid(&self) -> QueueResult<()> {
        if self.0.trim().is_empty() {
            return Err(QueueError::invalid_argument("job id must be a non-empty string"));
        }
        Ok(())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be processed.
    Pending,
    /// Waiting for its delay to elapse.
    Delayed,
    /// A processor is running it.
    Processing,
    /// Finished successfully.
    Completed,
    /// Last attempt failed and no retry is scheduled.
    Failed,
    /// Recurring template (database adapter only).
    Recurring,
}

impl JobStatus {
    /// All statuses, in reporting order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Delayed,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Recurring,
    ];

    /// Stable lowercase name, as stored by the database drivers.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Delayed => "delayed",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Recurring => "recurring",
        }
    }

    /// Returns true for `completed` and `failed`.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QueueError::invalid_argument(format!("unknown job status: {s}")))
    }
}

/// Enqueue-time options.
///
/// Every field is optional so that per-call options can be layered over an
/// adapter's `defaultJobOptions` with [`JobOptions::merged_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Higher values are processed first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Milliseconds before the job becomes eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// Attempts ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Retry backoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffOptions>,

    /// Delete the job once it completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_complete: Option<bool>,

    /// Delete the job once it fails terminally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_fail: Option<bool>,
}

impl JobOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set a delay before the job becomes eligible.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the attempts ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the retry backoff.
    pub fn with_backoff(mut self, backoff: BackoffOptions) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Delete the job after it completes.
    pub fn with_remove_on_complete(mut self, remove: bool) -> Self {
        self.remove_on_complete = Some(remove);
        self
    }

    /// Delete the job after it fails terminally.
    pub fn with_remove_on_fail(mut self, remove: bool) -> Self {
        self.remove_on_fail = Some(remove);
        self
    }

    /// Fill unset fields from `defaults`.
    pub fn merged_with(self, defaults: &JobOptions) -> Self {
        Self {
            priority: self.priority.or(defaults.priority),
            delay: self.delay.or(defaults.delay),
            max_attempts: self.max_attempts.or(defaults.max_attempts),
            backoff: self.backoff.or_else(|| defaults.backoff.clone()),
            remove_on_complete: self.remove_on_complete.or(defaults.remove_on_complete),
            remove_on_fail: self.remove_on_fail.or(defaults.remove_on_fail),
        }
    }

    /// Effective priority.
    pub fn priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }

    /// Effective delay.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay.unwrap_or(0))
    }

    /// Effective attempts ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// Whether completed jobs are deleted.
    pub fn removes_on_complete(&self) -> bool {
        self.remove_on_complete.unwrap_or(false)
    }

    /// Whether terminally failed jobs are deleted.
    pub fn removes_on_fail(&self) -> bool {
        self.remove_on_fail.unwrap_or(false)
    }

    pub(crate) fn validate(&self) -> QueueResult<()> {
        if self.max_attempts == Some(0) {
            return Err(QueueError::invalid_argument("maxAttempts must be at least 1"));
        }
        Ok(())
    }
}

/// A unit of work and its lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job ID.
    pub id: JobId,

    /// Queue name.
    pub queue: String,

    /// Payload.
    pub data: Value,

    /// Resolved enqueue options.
    pub options: JobOptions,

    /// Current status.
    pub status: JobStatus,

    /// Attempts started so far.
    pub attempts: u32,

    /// Attempts ceiling.
    pub max_attempts: u32,

    /// Processor output of the successful attempt.
    pub result: Option<Value>,

    /// Message of the last failed attempt.
    pub error: Option<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// Earliest time the job may be processed.
    pub process_after: DateTime<Utc>,

    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job completed.
    pub completed_at: Option<DateTime<Utc>>,

    /// When the latest attempt failed.
    pub failed_at: Option<DateTime<Utc>>,
}

/// What `add_job` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReceipt {
    /// Job ID.
    pub id: JobId,
    /// Queue name.
    pub queue: String,
    /// Status right after enqueueing.
    pub status: JobStatus,
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// A retry is scheduled after `delay`.
    Retry {
        /// Backoff delay.
        delay: Duration,
    },
    /// Attempts are exhausted.
    Terminal,
}

/// Side effects of [`Job::apply_update`] that an adapter must act on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateEffect {
    /// Priority changed; dequeue order must be re-evaluated.
    pub priority_changed: bool,
    /// `process_after` changed on a waiting job.
    pub schedule_changed: bool,
}

/// Partial update accepted by `update_job`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    /// Replace the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Change the priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Change the attempts ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Reschedule a waiting job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_after: Option<DateTime<Utc>>,

    /// Change `removeOnComplete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_complete: Option<bool>,

    /// Change `removeOnFail`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_fail: Option<bool>,
}

impl JobUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the payload.
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Change the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Change the attempts ceiling.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Reschedule a waiting job.
    pub fn process_after(mut self, at: DateTime<Utc>) -> Self {
        self.process_after = Some(at);
        self
    }

    /// Change `removeOnComplete`.
    pub fn remove_on_complete(mut self, remove: bool) -> Self {
        self.remove_on_complete = Some(remove);
        self
    }

    /// Change `removeOnFail`.
    pub fn remove_on_fail(mut self, remove: bool) -> Self {
        self.remove_on_fail = Some(remove);
        self
    }

    /// Returns true when no field is set.
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
            && self.priority.is_none()
            && self.max_attempts.is_none()
            && self.process_after.is_none()
            && self.remove_on_complete.is_none()
            && self.remove_on_fail.is_none()
    }

    pub(crate) fn validate(&self) -> QueueResult<()> {
        if self.is_empty() {
            return Err(QueueError::invalid_argument("update payload has no fields"));
        }
        if self.max_attempts == Some(0) {
            return Err(QueueError::invalid_argument("maxAttempts must be at least 1"));
        }
        if matches!(self.data, Some(Value::Null)) {
            return Err(QueueError::invalid_argument("job data must not be null"));
        }
        Ok(())
    }
}

/// Fails with an invalid-argument error when the payload is JSON null.
pub(crate) fn ensure_data(data: &Value) -> QueueResult<()> {
    if data.is_null() {
        return Err(QueueError::invalid_argument("job data must not be null"));
    }
    Ok(())
}

pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Job {
    /// Creates a job from already-merged options.
    ///
    /// A non-zero delay yields `Delayed` with `process_after = now + delay`.
    pub fn new(queue: impl Into<String>, data: Value, options: JobOptions, now: DateTime<Utc>) -> Self {
        let delay = options.delay();
        let status = if delay.is_zero() {
            JobStatus::Pending
        } else {
            JobStatus::Delayed
        };

        Self {
            id: JobId::new(),
            queue: queue.into(),
            data,
            max_attempts: options.max_attempts(),
            options,
            status,
            attempts: 0,
            result: None,
            error: None,
            created_at: now,
            process_after: after(now, delay),
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Eligible iff pending and due.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.process_after <= now
    }

    /// Effective priority.
    pub fn priority(&self) -> i32 {
        self.options.priority()
    }

    /// Receipt for the caller of `add_job`.
    pub fn receipt(&self) -> JobReceipt {
        JobReceipt {
            id: self.id.clone(),
            queue: self.queue.clone(),
            status: self.status,
        }
    }

    /// Dequeue order: higher priority first, then older first.
    pub fn dequeue_cmp(&self, other: &Job) -> Ordering {
        other
            .priority()
            .cmp(&self.priority())
            .then_with(|| self.created_at.cmp(&other.created_at))
    }

    /// Mark the start of an attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Record a successful attempt.
    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.result = Some(result);
        self.error = None;
    }

    /// Record a failed attempt and decide whether to retry.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> FailureOutcome {
        self.status = JobStatus::Failed;
        self.failed_at = Some(now);
        self.error = Some(message.into());
        self.result = None;

        if self.attempts < self.max_attempts {
            let delay = backoff_delay(self.attempts, self.options.backoff.as_ref());
            self.status = JobStatus::Pending;
            self.process_after = after(now, delay);
            FailureOutcome::Retry { delay }
        } else {
            FailureOutcome::Terminal
        }
    }

    /// Whether the job should be deleted now that it has finished.
    pub fn should_remove(&self) -> bool {
        match self.status {
            JobStatus::Completed => self.options.removes_on_complete(),
            JobStatus::Failed => self.options.removes_on_fail(),
            _ => false,
        }
    }

    /// Merge a partial update.
    pub fn apply_update(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> QueueResult<UpdateEffect> {
        update.validate()?;

        if let Some(max_attempts) = update.max_attempts {
            // A waiting job still has its next attempt ahead of it.
            let exhausted = match self.status {
                JobStatus::Pending | JobStatus::Delayed => max_attempts <= self.attempts,
                JobStatus::Processing => max_attempts < self.attempts,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Recurring => false,
            };
            if exhausted {
                return Err(QueueError::invalid_argument(format!(
                    "maxAttempts {max_attempts} leaves no room after the {} attempts already made",
                    self.attempts
                )));
            }
        }

        let mut effect = UpdateEffect::default();

        if let Some(data) = &update.data {
            self.data = data.clone();
        }
        if let Some(priority) = update.priority {
            effect.priority_changed = priority != self.priority();
            self.options.priority = Some(priority);
        }
        if let Some(max_attempts) = update.max_attempts {
            self.max_attempts = max_attempts;
            self.options.max_attempts = Some(max_attempts);
        }
        if let Some(remove) = update.remove_on_complete {
            self.options.remove_on_complete = Some(remove);
        }
        if let Some(remove) = update.remove_on_fail {
            self.options.remove_on_fail = Some(remove);
        }
        if let Some(at) = update.process_after {
            if matches!(self.status, JobStatus::Pending | JobStatus::Delayed) {
                self.process_after = at;
                self.status = if at > now {
                    JobStatus::Delayed
                } else {
                    JobStatus::Pending
                };
                effect.schedule_changed = true;
            }
        }

        Ok(effect)
    }

    /// Reset a terminally failed job so it runs again from scratch.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        if self.status != JobStatus::Failed {
            return Err(QueueError::InvalidState {
                expected: JobStatus::Failed.to_string(),
                actual: self.status.to_string(),
            });
        }
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.error = None;
        self.failed_at = None;
        self.started_at = None;
        self.process_after = now;
        Ok(())
    }
}
