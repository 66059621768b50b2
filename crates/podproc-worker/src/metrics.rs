//! Prometheus metrics for the worker.

use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> WorkerResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| WorkerError::config(format!("Failed to install Prometheus recorder: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "podproc_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "podproc_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "podproc_job_duration_seconds";
    pub const MESSAGES_REJECTED_TOTAL: &str = "podproc_messages_rejected_total";
    pub const CONSUMER_CONNECT_FAILURES_TOTAL: &str = "podproc_consumer_connect_failures_total";
}

/// Record a successfully handled job.
pub fn record_job_completed(duration: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "completed").record(duration.as_secs_f64());
}

/// Record a failed job, labelled by error kind.
pub fn record_job_failed(reason: &'static str, duration: Duration) {
    counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failed").record(duration.as_secs_f64());
}

/// Record a message that was rejected without running a job.
pub fn record_message_rejected(reason: &'static str) {
    counter!(names::MESSAGES_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a failed or lost queue connection.
pub fn record_connect_failure() {
    counter!(names::CONSUMER_CONNECT_FAILURES_TOTAL).increment(1);
}
