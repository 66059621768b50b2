//! Redis Streams transport.

use std::collections::VecDeque;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadReply};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::transport::{Delivery, MessageTransport, Subscription};

/// Entry field holding the JSON job request.
const PAYLOAD_FIELD: &str = "job";
/// Optional entry field naming the stream for the acknowledgment.
const REPLY_TO_FIELD: &str = "reply_to";
/// Entries claimed per XAUTOCLAIM call.
const CLAIM_BATCH: usize = 50;
/// Upper bound on XAUTOCLAIM calls per connect.
const MAX_CLAIM_ROUNDS: usize = 20;

/// Transport reading job requests from a Redis stream consumer group.
pub struct RedisStreamTransport {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
}

impl RedisStreamTransport {
    /// Create a transport. No connection is made until [`connect`](MessageTransport::connect).
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url().as_str())?;
        let consumer_name = format!("podproc-{}", Uuid::new_v4());

        Ok(Self {
            client,
            config,
            consumer_name,
        })
    }

    /// Create the consumer group if it does not exist yet.
    async fn ensure_group(&self, conn: &mut MultiplexedConnection, stream: &str) -> QueueResult<()> {
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(()) => info!("Created consumer group {} on {}", self.config.consumer_group, stream),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Move entries that other consumers left unsettled for longer than the
    /// claim idle time into this consumer's pending list.
    async fn claim_abandoned(&self, conn: &mut MultiplexedConnection, stream: &str) -> QueueResult<usize> {
        let min_idle_ms = self.config.claim_idle.as_millis() as u64;
        let mut cursor = "0-0".to_string();
        let mut claimed = 0;

        for _ in 0..MAX_CLAIM_ROUNDS {
            let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
                .arg(stream)
                .arg(&self.config.consumer_group)
                .arg(&self.consumer_name)
                .arg(min_idle_ms)
                .arg(&cursor)
                .arg("COUNT")
                .arg(CLAIM_BATCH)
                .arg("JUSTID")
                .query_async(conn)
                .await?;

            let mut parts = reply.into_iter();
            let next: String = match parts.next() {
                Some(value) => redis::from_redis_value(&value)?,
                None => break,
            };
            if let Some(ids) = parts.next() {
                let ids: Vec<String> = redis::from_redis_value(&ids)?;
                claimed += ids.len();
            }

            if next == "0-0" {
                break;
            }
            cursor = next;
        }

        if claimed > 0 {
            info!("Claimed {} abandoned messages on {}", claimed, stream);
        }
        Ok(claimed)
    }
}

#[async_trait]
impl MessageTransport for RedisStreamTransport {
    async fn connect(&self) -> QueueResult<Box<dyn Subscription>> {
        info!("Connecting to queue at {}", self.config.redacted_url());

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let stream = self.config.namespaced(&self.config.requests_stream);
        self.ensure_group(&mut conn, &stream).await?;
        self.claim_abandoned(&mut conn, &stream).await?;

        info!(
            "Consumer {} listening on {} (group {})",
            self.consumer_name, stream, self.config.consumer_group
        );

        Ok(Box::new(RedisSubscription {
            conn,
            stream,
            replies_stream: self.config.namespaced(&self.config.replies_stream),
            dlq_stream: self.config.namespaced(&self.config.dlq_stream),
            group: self.config.consumer_group.clone(),
            consumer_name: self.consumer_name.clone(),
            block_ms: self.config.block_timeout.as_millis() as u64,
            pending_cursor: Some("0-0".to_string()),
            buffered: VecDeque::new(),
        }))
    }
}

/// An open consumer-group registration.
struct RedisSubscription {
    conn: MultiplexedConnection,
    stream: String,
    replies_stream: String,
    dlq_stream: String,
    group: String,
    consumer_name: String,
    block_ms: u64,
    /// Position in this consumer's pending list; `None` once it is drained
    /// and reads switch to new messages.
    pending_cursor: Option<String>,
    buffered: VecDeque<Delivery>,
}

impl RedisSubscription {
    /// Acknowledge and remove a message from the request stream.
    async fn settle(&mut self, message_id: &str) -> QueueResult<()> {
        redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(message_id)
            .query_async::<()>(&mut self.conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.stream)
            .arg(message_id)
            .query_async::<()>(&mut self.conn)
            .await?;

        debug!("Acknowledged message {}", message_id);
        Ok(())
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_delivery(&mut self) -> QueueResult<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.buffered.pop_front() {
                return Ok(Some(delivery));
            }

            if let Some(cursor) = self.pending_cursor.clone() {
                // Entries delivered to this consumer earlier but never settled
                let reply: StreamReadReply = redis::cmd("XREADGROUP")
                    .arg("GROUP")
                    .arg(&self.group)
                    .arg(&self.consumer_name)
                    .arg("COUNT")
                    .arg(1)
                    .arg("STREAMS")
                    .arg(&self.stream)
                    .arg(&cursor)
                    .query_async(&mut self.conn)
                    .await?;

                let entries: Vec<StreamId> = reply.keys.into_iter().flat_map(|k| k.ids).collect();
                match entries.last().map(|e| e.id.clone()) {
                    Some(last_id) => {
                        self.pending_cursor = Some(last_id);
                        for entry in entries {
                            info!("Redelivering unsettled message {}", entry.id);
                            self.buffered.push_back(to_delivery(entry));
                        }
                    }
                    None => {
                        debug!("Pending list drained, reading new messages");
                        self.pending_cursor = None;
                    }
                }
                continue;
            }

            let reply: StreamReadReply = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer_name)
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(self.block_ms)
                .arg("STREAMS")
                .arg(&self.stream)
                .arg(">")
                .query_async(&mut self.conn)
                .await?;

            for stream_key in reply.keys {
                for entry in stream_key.ids {
                    self.buffered.push_back(to_delivery(entry));
                }
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery, reply: &[u8]) -> QueueResult<()> {
        let target = delivery
            .reply_to
            .clone()
            .unwrap_or_else(|| self.replies_stream.clone());

        redis::cmd("XADD")
            .arg(&target)
            .arg("*")
            .arg("reply")
            .arg(reply)
            .arg("correlation_id")
            .arg(&delivery.id)
            .query_async::<()>(&mut self.conn)
            .await?;

        self.settle(&delivery.id).await
    }

    async fn reject(&mut self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        redis::cmd("XADD")
            .arg(&self.dlq_stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(delivery.payload.as_slice())
            .arg("error")
            .arg(reason)
            .arg("original_id")
            .arg(&delivery.id)
            .query_async::<()>(&mut self.conn)
            .await?;

        self.settle(&delivery.id).await?;
        warn!("Moved message {} to {}: {}", delivery.id, self.dlq_stream, reason);
        Ok(())
    }
}

fn to_delivery(entry: StreamId) -> Delivery {
    let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_else(|| {
        warn!("Message {} has no '{}' field", entry.id, PAYLOAD_FIELD);
        Vec::new()
    });

    Delivery {
        reply_to: entry.get::<String>(REPLY_TO_FIELD),
        payload,
        id: entry.id,
    }
}
