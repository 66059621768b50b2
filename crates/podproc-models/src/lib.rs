//! Shared data models for the podcast processor.
//!
//! This crate provides Serde-serializable types for:
//! - Inbound job requests and acknowledgment payloads
//! - Object storage URIs (`s3://bucket/key`)
//! - Segment descriptors handed to the composition engine

pub mod audio;
pub mod job;
pub mod s3_uri;
pub mod segment;

pub use audio::AudioFormat;
pub use job::{JobAck, JobId, JobRequest, SegmentSource};
pub use s3_uri::{S3Uri, S3UriError};
pub use segment::{describe_segments, SegmentDescriptor};
