//! Structured logging for podcast assembly jobs.
//!
//! Every line and the job span carry the job id, the segment count and the
//! destination URI, so one job can be followed through JSON logs.

use podproc_models::{JobId, JobRequest};
use tracing::{error, info, warn, Span};

/// Logger bound to one assembly job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    segment_count: usize,
    output: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, request: &JobRequest) -> Self {
        Self {
            job_id: job_id.to_string(),
            segment_count: request.segments.len(),
            output: request.output_s3_uri.clone(),
        }
    }

    pub fn log_start(&self) {
        info!(
            job_id = %self.job_id,
            segment_count = self.segment_count,
            output = %self.output,
            "Assembling {} segments into {}", self.segment_count, self.output
        );
    }

    /// One pipeline stage finished.
    pub fn log_stage(&self, stage: &str, message: &str) {
        info!(
            job_id = %self.job_id,
            stage,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "{}", message);
    }

    pub fn log_error(&self, kind: &str, message: &str) {
        error!(
            job_id = %self.job_id,
            error_kind = kind,
            output = %self.output,
            "Job failed: {}", message
        );
    }

    pub fn log_completion(&self, elapsed_ms: u128) {
        info!(
            job_id = %self.job_id,
            segment_count = self.segment_count,
            output = %self.output,
            elapsed_ms = elapsed_ms as u64,
            "Published {}", self.output
        );
    }

    /// Span wrapping the whole job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "podcast_job",
            job_id = %self.job_id,
            segment_count = self.segment_count,
            output = %self.output
        )
    }
}
