//! Job request and acknowledgment payloads exchanged over the queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::s3_uri::S3Uri;

/// Unique identifier for one handled message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One input segment of a job, in playback order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSource {
    #[serde(rename = "s3Uri")]
    pub s3_uri: String,
}

impl SegmentSource {
    pub fn new(s3_uri: impl Into<String>) -> Self {
        Self {
            s3_uri: s3_uri.into(),
        }
    }
}

/// Request to assemble an ordered list of segments into one output object.
///
/// Decoded from the JSON body of one inbound queue message:
/// `{ "outputS3Uri": "...", "segments": [ { "s3Uri": "..." } ] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Destination of the composed file
    #[serde(rename = "outputS3Uri")]
    pub output_s3_uri: String,
    /// Source segments; order is playback order
    pub segments: Vec<SegmentSource>,
}

impl JobRequest {
    /// Create a request from an output URI and ordered segment URIs.
    pub fn new<I, S>(output_s3_uri: impl Into<String>, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            output_s3_uri: output_s3_uri.into(),
            segments: segments.into_iter().map(SegmentSource::new).collect(),
        }
    }

    /// Segment URIs in playback order.
    pub fn segment_uris(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.s3_uri.as_str())
    }

    /// Validate the request.
    ///
    /// Performs no I/O, so callers can reject a bad request before touching
    /// the network or the filesystem.
    pub fn validate(&self) -> Result<(), String> {
        if self.segments.is_empty() {
            return Err("At least one segment is required".to_string());
        }

        S3Uri::parse(&self.output_s3_uri)
            .map_err(|e| format!("Invalid outputS3Uri: {}", e))?;

        for (index, segment) in self.segments.iter().enumerate() {
            S3Uri::parse(&segment.s3_uri)
                .map_err(|e| format!("Invalid s3Uri for segment {}: {}", index, e))?;
        }

        Ok(())
    }

    /// Build the acknowledgment returned after a successful run.
    pub fn ack(&self) -> JobAck {
        JobAck {
            output_s3_uri: self.output_s3_uri.clone(),
        }
    }
}

/// Acknowledgment payload returned by the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAck {
    #[serde(rename = "outputS3Uri")]
    pub output_s3_uri: String,
}
