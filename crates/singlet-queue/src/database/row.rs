//! Row mapping shared by the SQL drivers.
//!
//! Timestamps are stored as epoch milliseconds and JSON columns as text so
//! the same layout works on every backend.

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobOptions, JobStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

/// Columns selected by every read query, in table order.
pub(crate) const COLUMNS: &str = "id, queue, data, options, status, priority, attempts, \
     max_attempts, result, error, created_at, process_after, started_at, completed_at, failed_at";

#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    pub id: String,
    pub queue: String,
    pub data: String,
    pub options: String,
    pub status: String,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub process_after: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
}

/// Bind values for inserts and saves.
pub(crate) struct JobParams {
    pub id: String,
    pub queue: String,
    pub data: String,
    pub options: String,
    pub status: &'static str,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub process_after: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> QueueResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Internal(format!("timestamp out of range: {ms}")))
}

fn count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn uncount(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

impl JobParams {
    pub(crate) fn from_job(job: &Job) -> QueueResult<Self> {
        // delayed is derived from process_after on read
        let status = match job.status {
            JobStatus::Delayed => JobStatus::Pending,
            other => other,
        };

        Ok(Self {
            id: job.id.to_string(),
            queue: job.queue.clone(),
            data: serde_json::to_string(&job.data)?,
            options: serde_json::to_string(&job.options)?,
            status: status.as_str(),
            priority: job.priority(),
            attempts: count(job.attempts),
            max_attempts: count(job.max_attempts),
            result: job.result.as_ref().map(serde_json::to_string).transpose()?,
            error: job.error.clone(),
            created_at: to_millis(job.created_at),
            process_after: to_millis(job.process_after),
            started_at: job.started_at.map(to_millis),
            completed_at: job.completed_at.map(to_millis),
            failed_at: job.failed_at.map(to_millis),
        })
    }
}

impl JobRow {
    pub(crate) fn into_job(self, now: DateTime<Utc>) -> QueueResult<Job> {
        let mut status: JobStatus = self.status.parse()?;
        let process_after = from_millis(self.process_after)?;
        if status == JobStatus::Pending && process_after > now {
            status = JobStatus::Delayed;
        }

        let mut options: JobOptions = serde_json::from_str(&self.options)?;
        options.priority = Some(self.priority);

        Ok(Job {
            id: JobId::from(self.id),
            queue: self.queue,
            data: serde_json::from_str(&self.data)?,
            options,
            status,
            attempts: uncount(self.attempts),
            max_attempts: uncount(self.max_attempts),
            result: self
                .result
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?,
            error: self.error,
            created_at: from_millis(self.created_at)?,
            process_after,
            started_at: self.started_at.map(from_millis).transpose()?,
            completed_at: self.completed_at.map(from_millis).transpose()?,
            failed_at: self.failed_at.map(from_millis).transpose()?,
        })
    }
}

pub(crate) fn into_jobs(rows: Vec<JobRow>, now: DateTime<Utc>) -> QueueResult<Vec<Job>> {
    rows.into_iter().map(|row| row.into_job(now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn row_from(params: JobParams) -> JobRow {
        JobRow {
            id: params.id,
            queue: params.queue,
            data: params.data,
            options: params.options,
            status: params.status.to_string(),
            priority: params.priority,
            attempts: params.attempts,
            max_attempts: params.max_attempts,
            result: params.result,
            error: params.error,
            created_at: params.created_at,
            process_after: params.process_after,
            started_at: params.started_at,
            completed_at: params.completed_at,
            failed_at: params.failed_at,
        }
    }

    #[test]
    fn test_delayed_stored_as_pending() {
        let now = Utc::now();
        let job = Job::new(
            "q",
            json!({"a": 1}),
            JobOptions::new().with_delay(std::time::Duration::from_secs(5)),
            now,
        );
        let params = JobParams::from_job(&job).unwrap();
        assert_eq!(params.status, "pending");

        let read = row_from(params).into_job(now).unwrap();
        assert_eq!(read.status, JobStatus::Delayed);

        let later = row_from(JobParams::from_job(&job).unwrap())
            .into_job(now + Duration::seconds(6))
            .unwrap();
        assert_eq!(later.status, JobStatus::Pending);
    }

    #[test]
    fn test_row_preserves_fields() {
        let now = Utc::now();
        let mut job = Job::new("q", json!([1, 2]), JobOptions::new().with_priority(4), now);
        job.begin_attempt(now);
        job.complete(json!({"ok": true}), now);

        let read = row_from(JobParams::from_job(&job).unwrap()).into_job(now).unwrap();
        assert_eq!(read.id, job.id);
        assert_eq!(read.data, json!([1, 2]));
        assert_eq!(read.priority(), 4);
        assert_eq!(read.status, JobStatus::Completed);
        assert_eq!(read.result, Some(json!({"ok": true})));
        assert_eq!(read.attempts, 1);
        assert_eq!(
            read.completed_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let job = Job::new("q", json!(1), JobOptions::new(), Utc::now());
        let mut row = row_from(JobParams::from_job(&job).unwrap());
        row.status = "exploded".to_string();
        assert!(row.into_job(Utc::now()).is_err());
    }
}
