//! Podcast assembly worker.
//!
//! This crate provides:
//! - Immutable worker configuration loaded once at startup
//! - The job pipeline (stage, compose, publish, clean up)
//! - The consumer supervisor with bounded reconnection
//! - The health endpoint and the runner that hosts both services

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod runner;
pub mod staging;
pub mod supervisor;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use health::{health_router, HealthResponse};
pub use logging::JobLogger;
pub use pipeline::{JobHandler, JobPipeline, PipelineConfig};
pub use runner::ServiceRunner;
pub use staging::{sweep_stale_staging, StagingDir};
pub use supervisor::{ConsumerState, ConsumerSupervisor, SupervisorPolicy, MAX_CONNECT_ATTEMPTS};
