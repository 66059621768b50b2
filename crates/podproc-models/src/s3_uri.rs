//! Object storage URI parsing.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing an `s3://` URI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum S3UriError {
    #[error("malformed URI '{0}'")]
    Malformed(String),

    #[error("unsupported scheme '{0}', expected s3")]
    UnsupportedScheme(String),

    #[error("URI '{0}' has no bucket")]
    MissingBucket(String),

    #[error("URI '{0}' does not name an object")]
    MissingKey(String),
}

/// A parsed `s3://<bucket>/<key>` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Uri {
    bucket: String,
    key: String,
}

impl S3Uri {
    /// Parse an `s3://bucket/key` URI.
    ///
    /// The key is taken verbatim after the first `/` following the bucket;
    /// `#`, `?` and `%` are ordinary key characters.
    pub fn parse(input: &str) -> Result<Self, S3UriError> {
        let trimmed = input.trim();
        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| S3UriError::Malformed(input.to_string()))?;

        if !scheme.eq_ignore_ascii_case("s3") {
            return Err(S3UriError::UnsupportedScheme(scheme.to_string()));
        }

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));

        if bucket.is_empty() {
            return Err(S3UriError::MissingBucket(input.to_string()));
        }
        if key.is_empty() || key.ends_with('/') {
            return Err(S3UriError::MissingKey(input.to_string()));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Build a URI from its parts.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Full object key within the bucket.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last path component of the key (the object name).
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Key without its last component; empty for objects at the bucket root.
    pub fn prefix(&self) -> &str {
        match self.key.rfind('/') {
            Some(idx) => &self.key[..idx],
            None => "",
        }
    }

    /// Lower-cased extension of the object name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < name.len() => Some(name[idx + 1..].to_lowercase()),
            _ => None,
        }
    }
}

impl FromStr for S3Uri {
    type Err = S3UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
