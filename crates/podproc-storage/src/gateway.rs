//! Storage gateway used by the job pipeline.
//!
//! Wraps an [`ObjectStore`] with the local bookkeeping every transfer needs:
//! URI parsing, parent directory creation, post-transfer existence checks,
//! per-transfer timeouts and a log line for every attempt and failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use podproc_models::{AudioFormat, S3Uri};
use tracing::{error, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// What a failed download does to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadMode {
    /// A failed transfer is returned as an error.
    #[default]
    Strict,
    /// A failed transfer is logged and the destination path is still
    /// returned.
    Lenient,
}

/// Download/upload front end over an object store.
#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    transfer_timeout: Duration,
    download_mode: DownloadMode,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>, transfer_timeout: Duration) -> Self {
        Self {
            store,
            transfer_timeout,
            download_mode: DownloadMode::Strict,
        }
    }

    /// Set how download failures are reported.
    pub fn with_download_mode(mut self, mode: DownloadMode) -> Self {
        self.download_mode = mode;
        self
    }

    pub fn download_mode(&self) -> DownloadMode {
        self.download_mode
    }

    /// Fetch `source_uri` into `destination`, creating parent directories.
    ///
    /// In [`DownloadMode::Strict`] the file is guaranteed to exist on `Ok`.
    /// A malformed URI or an unusable destination directory is an error in
    /// both modes.
    pub async fn download(&self, source_uri: &str, destination: &Path) -> StorageResult<PathBuf> {
        let uri = S3Uri::parse(source_uri)?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::LocalDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        info!(
            bucket = uri.bucket(),
            prefix = uri.prefix(),
            object = uri.file_name(),
            "Downloading {} to {}",
            uri,
            destination.display()
        );

        let result = self.fetch(&uri, destination).await;

        match result {
            Ok(()) => {
                info!("Downloaded {} to {}", uri, destination.display());
                Ok(destination.to_path_buf())
            }
            Err(e) => {
                error!(
                    bucket = uri.bucket(),
                    key = uri.key(),
                    "Failed to download {}: {}",
                    uri,
                    e
                );
                match self.download_mode {
                    DownloadMode::Strict => Err(e),
                    DownloadMode::Lenient => {
                        warn!(
                            "Continuing without {} (lenient downloads enabled)",
                            destination.display()
                        );
                        Ok(destination.to_path_buf())
                    }
                }
            }
        }
    }

    async fn fetch(&self, uri: &S3Uri, destination: &Path) -> StorageResult<()> {
        let transfer = self.store.get_to_file(uri.bucket(), uri.key(), destination);

        tokio::time::timeout(self.transfer_timeout, transfer)
            .await
            .map_err(|_| StorageError::Timeout(uri.to_string(), self.transfer_timeout.as_secs()))??;

        if !tokio::fs::try_exists(destination).await.unwrap_or(false) {
            return Err(StorageError::download_failed(format!(
                "{} was not written to {}",
                uri,
                destination.display()
            )));
        }

        Ok(())
    }

    /// Publish `local_path` to `destination_uri`.
    pub async fn upload(&self, local_path: &Path, destination_uri: &str) -> StorageResult<()> {
        let uri = S3Uri::parse(destination_uri)?;

        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            error!("Refusing to upload missing file {}", local_path.display());
            return Err(StorageError::MissingLocalFile(local_path.to_path_buf()));
        }

        let content_type = content_type_for(local_path);
        info!(
            bucket = uri.bucket(),
            key = uri.key(),
            "Uploading {} to {}",
            local_path.display(),
            uri
        );

        let transfer = self
            .store
            .put_file(local_path, uri.bucket(), uri.key(), content_type);

        let result = tokio::time::timeout(self.transfer_timeout, transfer)
            .await
            .map_err(|_| StorageError::Timeout(uri.to_string(), self.transfer_timeout.as_secs()))
            .and_then(|r| r);

        match result {
            Ok(()) => {
                info!("Uploaded {} to {}", local_path.display(), uri);
                Ok(())
            }
            Err(e) => {
                error!(
                    bucket = uri.bucket(),
                    key = uri.key(),
                    "Failed to upload {}: {}",
                    local_path.display(),
                    e
                );
                Err(e)
            }
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| AudioFormat::from_extension(&ext.to_string_lossy()))
        .map(|f| f.content_type())
        .unwrap_or("application/octet-stream")
}
