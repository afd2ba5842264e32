//! Metrics for job queue monitoring.
//!
//! Recorded through the `metrics` facade; they are no-ops until the host
//! application installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names for the queue.
pub mod names {
    /// Total jobs added.
    pub const JOBS_ADDED_TOTAL: &str = "singlet_queue_jobs_added_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "singlet_queue_jobs_completed_total";
    /// Total jobs failed terminally.
    pub const JOBS_FAILED_TOTAL: &str = "singlet_queue_jobs_failed_total";
    /// Total retries scheduled.
    pub const JOBS_RETRIED_TOTAL: &str = "singlet_queue_jobs_retried_total";
    /// Processor run time in seconds.
    pub const JOB_DURATION_SECONDS: &str = "singlet_queue_job_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ADDED_TOTAL, "Total number of jobs added");
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that exhausted their attempts"
    );
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");
    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Processor run time in seconds"
    );
}

/// Job metrics helper.
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job added.
    pub fn added(queue: &str) {
        counter!(names::JOBS_ADDED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a completed job.
    pub fn completed(queue: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "queue" => queue.to_string()).increment(1);
        histogram!(names::JOB_DURATION_SECONDS, "queue" => queue.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a terminal failure.
    pub fn failed(queue: &str, duration: Duration) {
        counter!(names::JOBS_FAILED_TOTAL, "queue" => queue.to_string()).increment(1);
        histogram!(names::JOB_DURATION_SECONDS, "queue" => queue.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a scheduled retry.
    pub fn retried(queue: &str, duration: Duration) {
        counter!(names::JOBS_RETRIED_TOTAL, "queue" => queue.to_string()).increment(1);
        histogram!(names::JOB_DURATION_SECONDS, "queue" => queue.to_string())
            .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            names::JOBS_ADDED_TOTAL,
            names::JOBS_COMPLETED_TOTAL,
            names::JOBS_FAILED_TOTAL,
            names::JOBS_RETRIED_TOTAL,
            names::JOB_DURATION_SECONDS,
        ] {
            assert!(name.starts_with("singlet_queue_"));
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        JobMetrics::added("q");
        JobMetrics::completed("q", Duration::from_millis(5));
        JobMetrics::failed("q", Duration::from_millis(5));
        JobMetrics::retried("q", Duration::from_millis(5));
    }
}
