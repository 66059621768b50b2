//! Object store seam.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Remote object storage addressed by bucket and key.
///
/// Implementations must be safe to share between workers; credentials are
/// fixed when the store is constructed.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write the object `bucket/key` to `dest`. The parent directory exists.
    async fn get_to_file(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<()>;

    /// Store the file at `src` as `bucket/key`.
    async fn put_file(
        &self,
        src: &Path,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()>;
}
