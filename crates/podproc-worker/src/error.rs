//! Worker error types.

use std::path::PathBuf;

use podproc_storage::StorageError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Could not decode job request: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Could not prepare staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer failed: {0}")]
    Transfer(#[source] StorageError),

    #[error("Composition failed: {0}")]
    Composition(#[from] podproc_media::MediaError),

    #[error("Queue connection error: {0}")]
    Connection(#[from] podproc_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Config(_) => "config",
            WorkerError::InvalidRequest(_) => "invalid_request",
            WorkerError::Decode(_) => "decode",
            WorkerError::Staging { .. } => "staging",
            WorkerError::Transfer(_) => "transfer",
            WorkerError::Composition(_) => "composition",
            WorkerError::Connection(_) => "connection",
            WorkerError::Io(_) => "io",
        }
    }
}

impl From<StorageError> for WorkerError {
    /// Local directory failures are staging problems, not transfer ones.
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::LocalDir { path, source } => Self::Staging { path, source },
            other => Self::Transfer(other),
        }
    }
}
