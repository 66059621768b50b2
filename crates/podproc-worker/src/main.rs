//! Podcast assembly worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use podproc_media::{check_ffmpeg, FfmpegComposer};
use podproc_queue::RedisStreamTransport;
use podproc_storage::{S3ObjectStore, StorageGateway};
use podproc_worker::metrics::init_metrics;
use podproc_worker::{ConsumerSupervisor, JobPipeline, ServiceRunner, WorkerConfig};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting podproc-worker");

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    match check_ffmpeg() {
        Ok(path) => info!("Using ffmpeg at {}", path.display()),
        Err(e) => warn!("{}; every composition will fail", e),
    }

    let store = Arc::new(S3ObjectStore::new(&config.storage));
    let storage = StorageGateway::new(store, config.transfer_timeout).with_download_mode(config.download_mode);
    let composer = Arc::new(FfmpegComposer::new().with_timeout(config.compose_timeout));
    let pipeline = Arc::new(JobPipeline::new(storage, composer, config.pipeline.clone()));

    let transport = match RedisStreamTransport::new(config.queue.clone()) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!("Failed to create queue transport: {}", e);
            std::process::exit(1);
        }
    };

    let supervisor = Arc::new(ConsumerSupervisor::new(
        transport,
        pipeline,
        config.supervisor.clone(),
    ));

    let mut runner = ServiceRunner::new(config.clone(), supervisor);
    if config.metrics_enabled {
        match init_metrics() {
            Ok(handle) => runner = runner.with_metrics(handle),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    if let Err(e) = runner.run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "podproc=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
