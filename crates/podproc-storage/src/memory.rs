//! In-memory object store for tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

type ObjectKey = (String, String);

/// Object store that keeps objects in memory and counts transfers.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectKey, Vec<u8>>>,
    broken: Mutex<HashSet<ObjectKey>>,
    fail_puts: AtomicBool,
    gets: AtomicUsize,
    puts: Mutex<Vec<ObjectKey>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    /// Read back an object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Make every download of `bucket/key` fail.
    pub fn break_object(&self, bucket: &str, key: &str) {
        self.broken
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Make every upload fail.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Number of download calls made so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Uploaded (bucket, key) pairs in call order.
    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_to_file(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<()> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let id = (bucket.to_string(), key.to_string());

        if self.broken.lock().unwrap().contains(&id) {
            return Err(StorageError::download_failed(format!(
                "injected failure for s3://{}/{}",
                bucket, key
            )));
        }

        let data = self
            .objects
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("s3://{}/{}", bucket, key)))?;

        tokio::fs::write(dest, data).await?;
        Ok(())
    }

    async fn put_file(
        &self,
        src: &Path,
        bucket: &str,
        key: &str,
        _content_type: &str,
    ) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::upload_failed("injected upload failure"));
        }

        let data = tokio::fs::read(src).await?;
        let id = (bucket.to_string(), key.to_string());
        self.puts.lock().unwrap().push(id.clone());
        self.objects.lock().unwrap().insert(id, data);
        Ok(())
    }
}
