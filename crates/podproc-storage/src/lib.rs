//! Object storage for the podcast processor.
//!
//! This crate provides:
//! - The `ObjectStore` seam (get/put by bucket and key)
//! - An S3 implementation backed by the AWS SDK
//! - `StorageGateway`, which adds URI parsing, local path preparation,
//!   existence checks, timeouts and transfer logging

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod store;

pub use client::S3ObjectStore;
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use gateway::{DownloadMode, StorageGateway};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryObjectStore;
pub use store::ObjectStore;
