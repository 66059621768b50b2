//! Storage client configuration.

use std::fmt;

use crate::error::{StorageError, StorageResult};

/// Credentials and endpoint for the object store.
#[derive(Clone)]
pub struct StorageConfig {
    /// AWS region
    pub region: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Optional S3-compatible endpoint (path-style addressing is used when set)
    pub endpoint_url: Option<String>,
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = non_blank(lookup("AWS_ACCESS_KEY_SECRET"))
            .or_else(|| non_blank(lookup("AWS_SECRET_ACCESS_KEY")))
            .ok_or_else(|| StorageError::config_error("AWS_ACCESS_KEY_SECRET not set"))?;

        Ok(Self {
            region: non_blank(lookup("AWS_REGION"))
                .ok_or_else(|| StorageError::config_error("AWS_REGION not set"))?,
            access_key_id: non_blank(lookup("AWS_ACCESS_KEY_ID"))
                .ok_or_else(|| StorageError::config_error("AWS_ACCESS_KEY_ID not set"))?,
            secret_access_key: secret,
            endpoint_url: non_blank(lookup("S3_ENDPOINT_URL")),
        })
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
