//! Consumer supervisor.
//!
//! Owns the queue subscription for the lifetime of the process. The state
//! machine is:
//!
//! ```text
//! Connecting -> Listening -> Failed(n) -> Connecting ...
//!                              \-> Exhausted   (n == max_attempts)
//! any state -> Stopped                         (shutdown requested)
//! ```
//!
//! Only connection-level failures move the supervisor to `Failed`. A message
//! that cannot be decoded or whose job fails is rejected and the subscription
//! keeps running. The attempt counter is never reset, so the supervisor gives
//! up after `max_attempts` connection failures over the whole process life.

use std::sync::Arc;
use std::time::Duration;

use podproc_models::{JobId, JobRequest};
use podproc_queue::{Delivery, MessageTransport, QueueError, QueueResult, Subscription};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::metrics;
use crate::pipeline::JobHandler;

/// Connection attempts before the consumer gives up for good.
pub const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Reconnection policy.
#[derive(Debug, Clone)]
pub struct SupervisorPolicy {
    /// Connection failures tolerated before giving up
    pub max_attempts: u32,
    /// Delay after the first failure (doubles each attempt)
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_CONNECT_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl SupervisorPolicy {
    /// Delay before reconnecting after failure number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Observable consumer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Listening,
    Failed { attempt: u32 },
    Exhausted,
    Stopped,
}

impl ConsumerState {
    /// True once the supervisor will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsumerState::Exhausted | ConsumerState::Stopped)
    }
}

/// Why a live subscription ended.
enum SessionEnd {
    Shutdown,
    Lost(WorkerError),
}

/// Keeps one subscription alive and dispatches its messages to a handler.
pub struct ConsumerSupervisor {
    transport: Arc<dyn MessageTransport>,
    handler: Arc<dyn JobHandler>,
    policy: SupervisorPolicy,
    state_tx: watch::Sender<ConsumerState>,
}

impl ConsumerSupervisor {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        handler: Arc<dyn JobHandler>,
        policy: SupervisorPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConsumerState::Connecting);
        Self {
            transport,
            handler,
            policy,
            state_tx,
        }
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state_tx.subscribe()
    }

    /// Run until the attempts are exhausted or `shutdown` turns true.
    ///
    /// Returns the terminal state.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ConsumerState {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return self.finish(ConsumerState::Stopped);
            }

            self.set_state(ConsumerState::Connecting);

            let connected = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    return self.finish(ConsumerState::Stopped);
                }
                result = self.transport.connect() => result,
            };

            let failure = match connected {
                Ok(mut subscription) => {
                    info!("Consumer subscribed, waiting for jobs");
                    self.set_state(ConsumerState::Listening);

                    match self.listen(subscription.as_mut(), &mut shutdown).await {
                        SessionEnd::Shutdown => return self.finish(ConsumerState::Stopped),
                        SessionEnd::Lost(err) => err,
                    }
                }
                Err(e) => WorkerError::from(e),
            };

            attempt += 1;
            metrics::record_connect_failure();
            self.set_state(ConsumerState::Failed { attempt });
            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                "Queue connection failed: {}",
                failure
            );

            if attempt >= self.policy.max_attempts {
                error!(
                    "Giving up on the queue after {} connection failures; the worker will no longer consume jobs",
                    attempt
                );
                return self.finish(ConsumerState::Exhausted);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    return self.finish(ConsumerState::Stopped);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn listen(
        &self,
        subscription: &mut dyn Subscription,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            let next = tokio::select! {
                _ = wait_for_shutdown(shutdown) => return SessionEnd::Shutdown,
                next = subscription.next_delivery() => next,
            };

            let delivery = match next {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    let closed = QueueError::subscription_closed("closed by broker");
                    return SessionEnd::Lost(closed.into());
                }
                Err(e) => return SessionEnd::Lost(e.into()),
            };

            if let Err(e) = self.dispatch(subscription, &delivery).await {
                return SessionEnd::Lost(e.into());
            }
        }
    }

    /// Handle one message and settle it.
    ///
    /// Only settlement errors are returned; a failed job is a rejection.
    async fn dispatch(&self, subscription: &mut dyn Subscription, delivery: &Delivery) -> QueueResult<()> {
        let request: JobRequest = match serde_json::from_slice(&delivery.payload) {
            Ok(request) => request,
            Err(e) => {
                let err = WorkerError::from(e);
                warn!(message_id = %delivery.id, "Rejecting undecodable message: {}", err);
                metrics::record_message_rejected(err.kind());
                return subscription.reject(delivery, &err.to_string()).await;
            }
        };

        let job_id = JobId::new();
        info!(
            job_id = %job_id,
            message_id = %delivery.id,
            "Received job with {} segments",
            request.segments.len()
        );

        match self.handler.handle(job_id.clone(), request).await {
            Ok(ack) => match serde_json::to_vec(&ack) {
                Ok(reply) => subscription.ack(delivery, &reply).await,
                Err(e) => {
                    error!(job_id = %job_id, "Failed to encode acknowledgment: {}", e);
                    subscription.reject(delivery, &e.to_string()).await
                }
            },
            Err(e) => {
                warn!(job_id = %job_id, message_id = %delivery.id, "Rejecting message: {}", e);
                metrics::record_message_rejected(e.kind());
                subscription.reject(delivery, &e.to_string()).await
            }
        }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state_tx.send_replace(state);
    }

    fn finish(&self, state: ConsumerState) -> ConsumerState {
        self.set_state(state);
        info!("Consumer supervisor finished in state {:?}", state);
        state
    }
}

/// Resolve once shutdown is requested. Never resolves if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerResult;
    use async_trait::async_trait;
    use podproc_models::JobAck;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Broker {
        connects: AtomicUsize,
        refuse_connections: bool,
        close_immediately: bool,
        pending: Mutex<VecDeque<Delivery>>,
        acked: Mutex<Vec<(String, Vec<u8>)>>,
        rejected: Mutex<Vec<(String, String)>>,
    }

    impl Broker {
        fn publish(&self, id: &str, payload: &str) {
            self.pending
                .lock()
                .unwrap()
                .push_back(Delivery::new(id, payload.as_bytes().to_vec()));
        }

        fn settled(&self) -> usize {
            self.acked.lock().unwrap().len() + self.rejected.lock().unwrap().len()
        }
    }

    struct FakeTransport(Arc<Broker>);

    #[async_trait]
    impl MessageTransport for FakeTransport {
        async fn connect(&self) -> QueueResult<Box<dyn Subscription>> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            if self.0.refuse_connections {
                return Err(QueueError::connection_failed("connection refused"));
            }
            Ok(Box::new(FakeSubscription(self.0.clone())))
        }
    }

    struct FakeSubscription(Arc<Broker>);

    #[async_trait]
    impl Subscription for FakeSubscription {
        async fn next_delivery(&mut self) -> QueueResult<Option<Delivery>> {
            if self.0.close_immediately {
                return Ok(None);
            }
            let next = self.0.pending.lock().unwrap().pop_front();
            match next {
                Some(delivery) => Ok(Some(delivery)),
                None => std::future::pending().await,
            }
        }

        async fn ack(&mut self, delivery: &Delivery, reply: &[u8]) -> QueueResult<()> {
            self.0
                .acked
                .lock()
                .unwrap()
                .push((delivery.id.clone(), reply.to_vec()));
            Ok(())
        }

        async fn reject(&mut self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
            self.0
                .rejected
                .lock()
                .unwrap()
                .push((delivery.id.clone(), reason.to_string()));
            Ok(())
        }
    }

    /// Fails any job whose destination mentions "broken".
    struct FakeHandler;

    #[async_trait]
    impl JobHandler for FakeHandler {
        async fn handle(&self, _job_id: JobId, request: JobRequest) -> WorkerResult<JobAck> {
            if request.output_s3_uri.contains("broken") {
                return Err(WorkerError::invalid_request("segment could not be composed"));
            }
            Ok(request.ack())
        }
    }

    fn fast_policy() -> SupervisorPolicy {
        SupervisorPolicy {
            max_attempts: MAX_CONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn supervisor(broker: &Arc<Broker>) -> Arc<ConsumerSupervisor> {
        Arc::new(ConsumerSupervisor::new(
            Arc::new(FakeTransport(broker.clone())),
            Arc::new(FakeHandler),
            fast_policy(),
        ))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = SupervisorPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unreachable_broker_exhausts_after_max_attempts() {
        let broker = Arc::new(Broker {
            refuse_connections: true,
            ..Default::default()
        });
        let sup = supervisor(&broker);
        let (_tx, rx) = watch::channel(false);

        let end = sup.run(rx).await;

        assert_eq!(end, ConsumerState::Exhausted);
        assert_eq!(*sup.state().borrow(), ConsumerState::Exhausted);
        assert_eq!(broker.connects.load(Ordering::SeqCst), MAX_CONNECT_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_lost_subscriptions_are_counted_without_reset() {
        // Every connection succeeds but closes at once
        let broker = Arc::new(Broker {
            close_immediately: true,
            ..Default::default()
        });
        let sup = supervisor(&broker);
        let (_tx, rx) = watch::channel(false);

        assert_eq!(sup.run(rx).await, ConsumerState::Exhausted);
        assert_eq!(broker.connects.load(Ordering::SeqCst), MAX_CONNECT_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_job_failure_rejects_and_keeps_listening() {
        let broker = Arc::new(Broker::default());
        broker.publish(
            "1-0",
            r#"{"outputS3Uri":"s3://out/broken.mp3","segments":[{"s3Uri":"s3://in/a.mp3"}]}"#,
        );
        broker.publish("2-0", "not json");
        broker.publish(
            "3-0",
            r#"{"outputS3Uri":"s3://out/ep.mp3","segments":[{"s3Uri":"s3://in/a.mp3"}]}"#,
        );

        let sup = supervisor(&broker);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let sup = sup.clone();
            async move { sup.run(rx).await }
        });

        wait_until(|| broker.settled() == 3).await;
        assert_eq!(*sup.state().borrow(), ConsumerState::Listening);
        assert_eq!(broker.connects.load(Ordering::SeqCst), 1);

        let rejected = broker.rejected.lock().unwrap().clone();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].0, "1-0");
        assert!(rejected[0].1.contains("segment could not be composed"));
        assert_eq!(rejected[1].0, "2-0");

        let acked = broker.acked.lock().unwrap().clone();
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].0, "3-0");
        let reply: serde_json::Value = serde_json::from_slice(&acked[0].1).unwrap();
        assert_eq!(reply, serde_json::json!({ "outputS3Uri": "s3://out/ep.mp3" }));

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let broker = Arc::new(Broker::default());
        let sup = supervisor(&broker);
        let (_tx, rx) = watch::channel(true);

        assert_eq!(sup.run(rx).await, ConsumerState::Stopped);
        assert_eq!(broker.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConsumerState::Exhausted.is_terminal());
        assert!(ConsumerState::Stopped.is_terminal());
        assert!(!ConsumerState::Failed { attempt: 4 }.is_terminal());
        assert!(!ConsumerState::Listening.is_terminal());
    }
}
