//! Bull-style job records and their translation to [`Job`].

use crate::backoff::BackoffOptions;
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobOptions, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Native job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeState {
    /// In the wait list.
    Waiting,
    /// In the delayed set.
    Delayed,
    /// Being processed.
    Active,
    /// Finished successfully.
    Completed,
    /// Attempts exhausted.
    Failed,
}

impl From<NativeState> for JobStatus {
    fn from(state: NativeState) -> Self {
        match state {
            NativeState::Waiting => JobStatus::Pending,
            NativeState::Delayed => JobStatus::Delayed,
            NativeState::Active => JobStatus::Processing,
            NativeState::Completed => JobStatus::Completed,
            NativeState::Failed => JobStatus::Failed,
        }
    }
}

impl NativeState {
    /// Native state for a job. A pending job that is not yet due (a retry
    /// waiting out its backoff) is `delayed`.
    pub fn for_job(job: &Job, now: DateTime<Utc>) -> QueueResult<Self> {
        Ok(match job.status {
            JobStatus::Pending if job.process_after > now => NativeState::Delayed,
            JobStatus::Pending => NativeState::Waiting,
            JobStatus::Delayed => NativeState::Delayed,
            JobStatus::Processing => NativeState::Active,
            JobStatus::Completed => NativeState::Completed,
            JobStatus::Failed => NativeState::Failed,
            JobStatus::Recurring => {
                return Err(QueueError::invalid_argument(
                    "recurring jobs are not supported by the redis adapter",
                ))
            }
        })
    }
}

/// Native job options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeOptions {
    /// Priority.
    #[serde(default)]
    pub priority: i32,
    /// Initial delay in milliseconds.
    #[serde(default)]
    pub delay: u64,
    /// Attempts ceiling.
    pub attempts: u32,
    /// Retry backoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffOptions>,
    /// Delete on completion.
    #[serde(default)]
    pub remove_on_complete: bool,
    /// Delete on terminal failure.
    #[serde(default)]
    pub remove_on_fail: bool,
}

/// Job record as stored in the jobs hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeJob {
    /// Id.
    pub id: String,
    /// Queue name.
    pub name: String,
    /// Payload.
    pub data: Value,
    /// Options.
    pub opts: NativeOptions,
    /// Current state.
    pub state: NativeState,
    /// Attempts started.
    pub attempts_made: u32,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Earliest processing time (ms).
    pub delay_until: i64,
    /// Start of the latest attempt (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<i64>,
    /// Completion time (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<i64>,
    /// Time of the latest failure (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_on: Option<i64>,
    /// Result of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returnvalue: Option<Value>,
    /// Message of the latest failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

fn from_millis(ms: i64) -> QueueResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Internal(format!("timestamp out of range: {ms}")))
}

impl NativeJob {
    /// Translate a job into its stored form.
    pub fn from_job(job: &Job, now: DateTime<Utc>) -> QueueResult<Self> {
        let options = &job.options;
        Ok(Self {
            id: job.id.to_string(),
            name: job.queue.clone(),
            data: job.data.clone(),
            opts: NativeOptions {
                priority: options.priority(),
                delay: options.delay.unwrap_or(0),
                attempts: job.max_attempts,
                backoff: options.backoff.clone(),
                remove_on_complete: options.removes_on_complete(),
                remove_on_fail: options.removes_on_fail(),
            },
            state: NativeState::for_job(job, now)?,
            attempts_made: job.attempts,
            timestamp: job.created_at.timestamp_millis(),
            delay_until: job.process_after.timestamp_millis(),
            processed_on: job.started_at.map(|t| t.timestamp_millis()),
            finished_on: job.completed_at.map(|t| t.timestamp_millis()),
            failed_on: job.failed_at.map(|t| t.timestamp_millis()),
            returnvalue: job.result.clone(),
            failed_reason: job.error.clone(),
        })
    }

    /// Translate the stored form back into a job.
    pub fn into_job(self) -> QueueResult<Job> {
        let options = JobOptions {
            priority: Some(self.opts.priority),
            delay: Some(self.opts.delay),
            max_attempts: Some(self.opts.attempts),
            backoff: self.opts.backoff,
            remove_on_complete: Some(self.opts.remove_on_complete),
            remove_on_fail: Some(self.opts.remove_on_fail),
        };

        Ok(Job {
            id: JobId::from(self.id),
            queue: self.name,
            data: self.data,
            status: self.state.into(),
            attempts: self.attempts_made,
            max_attempts: self.opts.attempts,
            options,
            result: self.returnvalue,
            error: self.failed_reason,
            created_at: from_millis(self.timestamp)?,
            process_after: from_millis(self.delay_until)?,
            started_at: self.processed_on.map(from_millis).transpose()?,
            completed_at: self.finished_on.map(from_millis).transpose()?,
            failed_at: self.failed_on.map(from_millis).transpose()?,
        })
    }
}
