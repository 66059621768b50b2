//! Message transport for job requests.
//!
//! This crate provides:
//! - The `MessageTransport` / `Subscription` seam the consumer drives
//! - A Redis Streams implementation with consumer groups, reply streams
//!   and a dead-letter stream for rejected messages

pub mod config;
pub mod error;
pub mod redis_stream;
pub mod transport;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use redis_stream::RedisStreamTransport;
pub use transport::{Delivery, MessageTransport, Subscription};
