//! Process host for the two long-lived services.
//!
//! The health endpoint and the consumer supervisor run side by side. The
//! supervisor giving up does not stop the health endpoint; only a shutdown
//! signal stops both.

use std::future::Future;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::health::health_router;
use crate::staging::sweep_stale_staging;
use crate::supervisor::{ConsumerState, ConsumerSupervisor};

/// Runs the health endpoint and the consumer until shutdown.
pub struct ServiceRunner {
    config: WorkerConfig,
    supervisor: Arc<ConsumerSupervisor>,
    metrics_handle: Option<PrometheusHandle>,
}

impl ServiceRunner {
    pub fn new(config: WorkerConfig, supervisor: Arc<ConsumerSupervisor>) -> Self {
        Self {
            config,
            supervisor,
            metrics_handle: None,
        }
    }

    /// Serve `/metrics` from this handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> WorkerResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Bind the configured health address and run until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> WorkerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.health_host, self.config.health_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Health endpoint listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    /// Run both services on an already bound listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> WorkerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        sweep_stale_staging(&self.config.pipeline.work_dir).await;

        if self.config.debug {
            self.config.log_environment();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signal_task = tokio::spawn(async move {
            shutdown.await;
            let _ = shutdown_tx.send(true);
        });

        let router = health_router(self.metrics_handle.clone());
        let mut health_shutdown = shutdown_rx.clone();
        let health_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = health_shutdown.wait_for(|stop| *stop).await;
                })
                .await
        });

        let supervisor = Arc::clone(&self.supervisor);
        let consumer_task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        let final_state = consumer_task.await.map_err(std::io::Error::from)?;
        if final_state == ConsumerState::Exhausted {
            error!("Queue consumer is exhausted; health endpoint stays up until shutdown");
        }

        let served = health_task.await.map_err(std::io::Error::from)?;
        signal_task.abort();
        served?;

        info!("Worker shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerResult;
    use crate::pipeline::JobHandler;
    use crate::supervisor::SupervisorPolicy;
    use async_trait::async_trait;
    use podproc_models::{JobAck, JobId, JobRequest};
    use podproc_queue::{MessageTransport, QueueError, QueueResult, Subscription};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    struct UnreachableBroker;

    #[async_trait]
    impl MessageTransport for UnreachableBroker {
        async fn connect(&self) -> QueueResult<Box<dyn Subscription>> {
            Err(QueueError::connection_failed("connection refused"))
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn handle(&self, _job_id: JobId, request: JobRequest) -> WorkerResult<JobAck> {
            Ok(request.ack())
        }
    }

    fn config(work_dir: &std::path::Path) -> WorkerConfig {
        let vars: HashMap<&str, String> = [
            ("AWS_REGION", "us-east-1".to_string()),
            ("AWS_ACCESS_KEY_ID", "key".to_string()),
            ("AWS_ACCESS_KEY_SECRET", "secret".to_string()),
            ("QUEUE_HOST", "localhost".to_string()),
            ("QUEUE_USERNAME", "user".to_string()),
            ("QUEUE_PASSWORD", "pass".to_string()),
            ("QUEUE_VIRTUAL_HOST", "/".to_string()),
            ("SERVER_HOST", "127.0.0.1".to_string()),
            ("SERVER_PORT", "0".to_string()),
            ("PODCAST_WORK_DIR", work_dir.display().to_string()),
        ]
        .into_iter()
        .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_health_survives_exhausted_consumer() {
        let work_dir = tempfile::tempdir().unwrap();
        let stale = work_dir.path().join("podcast-production").join("left-behind");
        std::fs::create_dir_all(&stale).unwrap();

        let supervisor = Arc::new(ConsumerSupervisor::new(
            Arc::new(UnreachableBroker),
            Arc::new(NoopHandler),
            SupervisorPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                ..Default::default()
            },
        ));
        let mut state = supervisor.state();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let runner = ServiceRunner::new(config(work_dir.path()), supervisor);
        let task = tokio::spawn(runner.serve(listener, async move {
            let _ = stop_rx.await;
        }));

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConsumerState::Exhausted),
        )
        .await
        .unwrap()
        .unwrap();

        let response = http_get(addr, "/").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#"{"status":"HODOR"}"#));
        assert!(!stale.exists());

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
