//! Storage abstraction trait
//!
//! Defines the operations the ingestion core needs from a bucket: put, get,
//! existence/size checks, listing for the orphan sweep, and delete.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use wallpaperdb_core::AppError;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One listed object.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Bucket operations used by the orchestrator and the reconciler.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write an object. Overwrites silently; keys are derived from unique
    /// wallpaper ids so collisions only happen on retry of the same upload.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Size in bytes of an existing object.
    async fn content_length(&self, key: &str) -> StorageResult<u64>;

    /// List keys under a prefix (the whole bucket when `None`). Used by the
    /// orphan sweep.
    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<ObjectEntry>>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// The bucket this backend writes into, recorded as `storage_bucket`.
    fn bucket(&self) -> &str;
}
