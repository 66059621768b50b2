//! Job pipeline.
//!
//! One run: validate the request, create a job-scoped staging directory,
//! download every segment in order, compose them, upload the result and
//! return the acknowledgment. The staging directory is closed when the run
//! ends, whatever the outcome; a cancelled run removes it on drop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use podproc_media::Composer;
use podproc_models::{describe_segments, AudioFormat, JobAck, JobId, JobRequest, S3Uri};
use podproc_storage::{DownloadMode, StorageGateway};
use tracing::Instrument;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::staging::StagingDir;

/// Settings for the job pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base directory; jobs stage under `<work_dir>/podcast-production/<pid>/<job_id>`
    pub work_dir: PathBuf,
    /// Crossfade applied into every non-first segment
    pub crossfade_ms: u64,
    /// Output format when the destination URI has no usable extension
    pub default_output_format: AudioFormat,
}

/// Something that turns one decoded request into an acknowledgment.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job_id: JobId, request: JobRequest) -> WorkerResult<JobAck>;
}

/// Stages, composes and publishes one podcast episode per request.
pub struct JobPipeline {
    storage: StorageGateway,
    composer: Arc<dyn Composer>,
    config: PipelineConfig,
}

impl JobPipeline {
    pub fn new(storage: StorageGateway, composer: Arc<dyn Composer>, config: PipelineConfig) -> Self {
        Self {
            storage,
            composer,
            config,
        }
    }

    /// Execute the pipeline for `request` under `job_id`.
    pub async fn run(&self, job_id: &JobId, request: &JobRequest) -> WorkerResult<JobAck> {
        // Nothing touches the network or the disk before this passes
        request.validate().map_err(WorkerError::invalid_request)?;

        let logger = JobLogger::new(job_id, request);
        logger.log_start();

        let staging = StagingDir::create(&self.config.work_dir, job_id).await?;
        let result = self.assemble(&staging, request, &logger).await;
        staging.close().await;

        result.map(|()| request.ack())
    }

    /// Download, compose and publish inside an existing staging directory.
    async fn assemble(
        &self,
        staging: &StagingDir,
        request: &JobRequest,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let local_files = self.stage_segments(staging, request, logger).await?;
        let segments = describe_segments(&local_files, self.config.crossfade_ms);

        let format = self.output_format(&request.output_s3_uri);
        let output = staging.file(&format!("output.{}", format.extension()));

        let produced = self.composer.compose(&segments, &output, format).await?;
        logger.log_stage(
            "compose",
            &format!("the produced audio is stored locally {}", produced.display()),
        );

        self.storage.upload(&produced, &request.output_s3_uri).await?;
        Ok(())
    }

    /// Download every segment into the staging directory, keeping order.
    async fn stage_segments(
        &self,
        staging: &StagingDir,
        request: &JobRequest,
        logger: &JobLogger,
    ) -> WorkerResult<Vec<PathBuf>> {
        let mut local_files = Vec::with_capacity(request.segments.len());

        for (index, source) in request.segment_uris().enumerate() {
            let uri = S3Uri::parse(source).map_err(|e| WorkerError::invalid_request(e.to_string()))?;
            let destination = staging.file(&local_name(index, &uri));

            let path = self.storage.download(source, &destination).await?;
            if self.storage.download_mode() == DownloadMode::Lenient && !path.exists() {
                logger.log_warning(&format!("segment {} ({}) is missing locally", index, source));
            }
            local_files.push(path);
        }

        logger.log_stage("download", &format!("staged {} segments", local_files.len()));
        Ok(local_files)
    }

    fn output_format(&self, output_uri: &str) -> AudioFormat {
        S3Uri::parse(output_uri)
            .ok()
            .and_then(|uri| uri.extension())
            .and_then(|ext| AudioFormat::from_extension(&ext))
            .unwrap_or(self.config.default_output_format)
    }
}

/// Local file name for the segment at `index`.
///
/// The index prefix keeps two segments with the same object name apart.
fn local_name(index: usize, uri: &S3Uri) -> String {
    format!("{:03}_{}", index, uri.file_name())
}

#[async_trait]
impl JobHandler for JobPipeline {
    async fn handle(&self, job_id: JobId, request: JobRequest) -> WorkerResult<JobAck> {
        let logger = JobLogger::new(&job_id, &request);
        let started = Instant::now();

        let result = self
            .run(&job_id, &request)
            .instrument(logger.create_span())
            .await;

        match &result {
            Ok(_) => {
                logger.log_completion(started.elapsed().as_millis());
                metrics::record_job_completed(started.elapsed());
            }
            Err(e) => {
                logger.log_error(e.kind(), &e.to_string());
                metrics::record_job_failed(e.kind(), started.elapsed());
            }
        }

        result
    }
}
