//! S3 storage implementation over `object_store`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, Error as ObjectStoreError, ObjectStore, ObjectStoreExt, PutOptions,
    PutPayload,
};

use wallpaperdb_core::config::S3Config;
use wallpaperdb_core::{AppError, Lifecycle};

use crate::traits::{ObjectEntry, ObjectStorage, StorageError, StorageResult};

/// S3-compatible object storage (AWS S3, MinIO, and friends).
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
}

impl S3Storage {
    /// Build the client from configuration. A custom `endpoint` switches on
    /// http for local MinIO-style deployments.
    pub fn new(config: &S3Config) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone());

        if let Some(ref key_id) = config.access_key_id {
            builder = builder.with_access_key_id(key_id.clone());
        }
        if let Some(ref secret) = config.secret_access_key {
            builder = builder.with_secret_access_key(secret.clone());
        }
        if let Some(ref endpoint) = config.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage {
            store,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let size = data.len() as u64;
        let location = Path::from(key.to_string());
        let start = std::time::Instant::now();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, PutPayload::from(data), opts)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 put failed"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 put successful"
        );

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
        let start = std::time::Instant::now();

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl Lifecycle for S3Storage {
    fn name(&self) -> &'static str {
        "object-storage"
    }

    async fn health(&self) -> Result<(), AppError> {
        // A head on a key that does not exist still proves the bucket is
        // reachable and credentials work.
        let location = Path::from(".healthcheck");
        match self.store.head(&location).await {
            Ok(_) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(AppError::Storage(e.to_string())),
        }
    }
}
