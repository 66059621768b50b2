//! Transport seam between the consumer and a concrete broker.

use async_trait::async_trait;

use crate::error::QueueResult;

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned message ID
    pub id: String,
    /// Raw message body (a JSON job request)
    pub payload: Vec<u8>,
    /// Where the acknowledgment payload should be published, if the
    /// sender asked for a specific destination
    pub reply_to: Option<String>,
}

impl Delivery {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// A broker that hands out subscriptions.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Open a connection and register this worker as a consumer.
    async fn connect(&self) -> QueueResult<Box<dyn Subscription>>;
}

/// A live consumer registration.
///
/// Any error returned from these methods is a connection-level failure.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `Ok(None)` means the broker closed the
    /// subscription.
    async fn next_delivery(&mut self) -> QueueResult<Option<Delivery>>;

    /// Publish `reply` for a handled message and acknowledge it.
    async fn ack(&mut self, delivery: &Delivery, reply: &[u8]) -> QueueResult<()>;

    /// Acknowledge a message that could not be handled, recording why.
    async fn reject(&mut self, delivery: &Delivery, reason: &str) -> QueueResult<()>;
}
