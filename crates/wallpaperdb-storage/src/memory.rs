//! In-memory storage backend for tests.
//!
//! Wraps `object_store::memory::InMemory` so tests exercise the exact same
//! trait surface as the S3 backend without a bucket.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Error as ObjectStoreError, ObjectStore, ObjectStoreExt, PutPayload};

use crate::traits::{ObjectEntry, ObjectStorage, StorageError, StorageResult};

pub struct MemoryStorage {
    store: InMemory,
    bucket: String,
}

impl MemoryStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            store: InMemory::new(),
            bucket: bucket.into(),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("wallpapers")
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let location = Path::from(key.to_string());
        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let location = Path::from(key.to_string());
        let result = self.store.get(&location).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::DownloadFailed(other.to_string()),
        })?;
        result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let location = Path::from(key.to_string());
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        let location = Path::from(key.to_string());
        match self.store.head(&location).await {
            Ok(meta) => Ok(meta.size),
            Err(ObjectStoreError::NotFound { .. }) => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<ObjectEntry>> {
        let prefix_path = prefix.map(|p| Path::from(p.to_string()));
        let metas: Vec<_> = self
            .store
            .list(prefix_path.as_ref())
            .try_collect()
            .await
            .map_err(|e| StorageError::ListFailed(e.to_string()))?;
        Ok(metas
            .into_iter()
            .map(|meta| ObjectEntry {
                key: meta.location.to_string(),
                size: meta.size,
                last_modified: meta.last_modified,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let location = Path::from(key.to_string());
        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(e.to_string())),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
