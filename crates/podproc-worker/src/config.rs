//! Worker configuration.
//!
//! Everything the process needs from its environment is read here, once,
//! into an immutable [`WorkerConfig`] that is handed to each service.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use podproc_models::AudioFormat;
use podproc_queue::QueueConfig;
use podproc_storage::{DownloadMode, StorageConfig};
use tracing::warn;

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::PipelineConfig;
use crate::supervisor::{SupervisorPolicy, MAX_CONNECT_ATTEMPTS};

/// Port used by the health endpoint when `SERVER_PORT` is unset.
pub const DEFAULT_HEALTH_PORT: u16 = 7070;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Object storage credentials
    pub storage: StorageConfig,
    /// Queue connection settings
    pub queue: QueueConfig,
    /// Job pipeline settings
    pub pipeline: PipelineConfig,
    /// Consumer reconnection policy
    pub supervisor: SupervisorPolicy,
    /// Health endpoint bind host
    pub health_host: String,
    /// Health endpoint port
    pub health_port: u16,
    /// Timeout for a single object transfer
    pub transfer_timeout: Duration,
    /// Timeout for one composition run
    pub compose_timeout: Duration,
    /// Download failure handling
    pub download_mode: DownloadMode,
    /// Serve Prometheus metrics on the health endpoint
    pub metrics_enabled: bool,
    /// Dump the environment before connecting to the queue
    pub debug: bool,
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage =
            StorageConfig::from_lookup(&lookup).map_err(|e| WorkerError::config(e.to_string()))?;
        let queue =
            QueueConfig::from_lookup(&lookup).map_err(|e| WorkerError::config(e.to_string()))?;

        let work_dir = lookup("PODCAST_WORK_DIR")
            .or_else(|| lookup("HOME"))
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let default_format = match lookup("OUTPUT_FORMAT").filter(|v| !v.trim().is_empty()) {
            Some(ext) => AudioFormat::from_extension(&ext)
                .ok_or_else(|| WorkerError::config(format!("OUTPUT_FORMAT '{}' is not supported", ext)))?,
            None => AudioFormat::Mp3,
        };

        let pipeline = PipelineConfig {
            work_dir,
            crossfade_ms: parse_or(&lookup, "CROSSFADE_MS", 100)?,
            default_output_format: default_format,
        };

        let supervisor = SupervisorPolicy {
            max_attempts: MAX_CONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(parse_or(&lookup, "CONSUMER_RETRY_BASE_MS", 1000)?),
            max_delay: Duration::from_millis(parse_or(&lookup, "CONSUMER_RETRY_MAX_MS", 30_000)?),
        };

        Ok(Self {
            storage,
            queue,
            pipeline,
            supervisor,
            health_host: lookup("SERVER_HOST")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            health_port: parse_or(&lookup, "SERVER_PORT", DEFAULT_HEALTH_PORT)?,
            transfer_timeout: Duration::from_secs(parse_or(&lookup, "TRANSFER_TIMEOUT_SECS", 600)?),
            compose_timeout: Duration::from_secs(parse_or(&lookup, "COMPOSE_TIMEOUT_SECS", 1800)?),
            download_mode: if flag(&lookup, "LENIENT_DOWNLOADS", false) {
                DownloadMode::Lenient
            } else {
                DownloadMode::Strict
            },
            metrics_enabled: flag(&lookup, "METRICS_ENABLED", true),
            debug: flag(&lookup, "DEBUG", false),
        })
    }

    /// Log every environment variable and the queue address verbatim.
    ///
    /// Only called when `DEBUG=true`; the output contains secrets.
    pub fn log_environment(&self) {
        warn!("DEBUG is enabled: logging the full environment, including secrets");
        for (key, value) in std::env::vars() {
            warn!("\t{} = {}", key, value);
        }
        warn!("Queue address: {}", self.queue.redis_url());
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> WorkerResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| WorkerError::config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}
