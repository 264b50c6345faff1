//! Upload orchestrator - the core write path.
//!
//! Sequences rate limiting, hashing and probing, the dedup check, the
//! write-ahead intent insert, the byte upload, the metadata finalize, and
//! the announcement. Holds no locks across await points; all coordination
//! with the reconciler goes through the metadata store.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Semaphore;

use wallpaperdb_core::events::{
    WallpaperUploadedEvent, HEADER_TRACEPARENT, SUBJECT_WALLPAPER_UPLOADED,
};
use wallpaperdb_core::{
    probe, sanitize_filename, AppError, Clock, ContentHash, StatePatch, UploadPolicies,
    UploadState, Wallpaper, WallpaperId,
};
use wallpaperdb_db::{StateMachine, WallpaperStore};
use wallpaperdb_events::{EventBus, EventHeaders};
use wallpaperdb_storage::{original_key, ObjectStorage};

use crate::health::LoopHeartbeats;
use crate::rate_limit::{RateLimitInfo, RateLimiter};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Bytes,
    pub filename: String,
    /// Content type claimed by the client. Informational only; the probe
    /// decides from the bytes.
    pub declared_mime_type: Option<String>,
    pub user_id: String,
    /// W3C trace context propagated onto the published event when present.
    pub traceparent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Processing,
    AlreadyUploaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub id: WallpaperId,
    pub status: UploadStatus,
    pub wallpaper: Wallpaper,
    pub rate_limit: RateLimitInfo,
}

pub struct UploadOrchestrator {
    store: Arc<dyn WallpaperStore>,
    machine: StateMachine,
    storage: Arc<dyn ObjectStorage>,
    bus: Arc<dyn EventBus>,
    rate_limiter: RateLimiter,
    policies: UploadPolicies,
    clock: Arc<dyn Clock>,
    heartbeats: Arc<LoopHeartbeats>,
    upload_permits: Arc<Semaphore>,
}

impl UploadOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn WallpaperStore>,
        machine: StateMachine,
        storage: Arc<dyn ObjectStorage>,
        bus: Arc<dyn EventBus>,
        rate_limiter: RateLimiter,
        policies: UploadPolicies,
        clock: Arc<dyn Clock>,
        heartbeats: Arc<LoopHeartbeats>,
        max_concurrent_uploads: usize,
    ) -> Self {
        Self {
            store,
            machine,
            storage,
            bus,
            rate_limiter,
            policies,
            clock,
            heartbeats,
            upload_permits: Arc::new(Semaphore::new(max_concurrent_uploads)),
        }
    }

    /// Ingest one upload.
    ///
    /// Returns as soon as bytes and metadata are durable; announcement
    /// failure after that point is an internal concern owned by the
    /// reconciler, never a request failure.
    #[tracing::instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            file_size = request.bytes.len(),
            operation = "handle_upload"
        )
    )]
    pub async fn handle_upload(&self, request: UploadRequest) -> Result<UploadResponse, AppError> {
        if request.user_id.trim().is_empty() {
            return Err(AppError::MissingUserId);
        }

        // Backpressure: excess intake fails fast instead of queueing here.
        let _permit = self
            .upload_permits
            .try_acquire()
            .map_err(|_| AppError::Overloaded)?;

        let rate_limit = self.rate_limiter.check(&request.user_id).await?;

        if request.bytes.is_empty() {
            return Err(AppError::MissingFile);
        }

        let policy = self.policies.for_user(&request.user_id);
        // Size first: an oversize payload reports FileTooLarge even when its
        // format is unrecognizable.
        policy.check_size(request.bytes.len() as u64)?;

        let payload = request.bytes.clone();
        let (content_hash, probed) = tokio::task::spawn_blocking(move || {
            let hash = ContentHash::of(&payload);
            let probed = probe(&payload)?;
            Ok::<_, AppError>((hash, probed))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Probe task failed: {}", e)))??;

        if let Some(ref declared) = request.declared_mime_type {
            if declared != &probed.mime_type {
                tracing::debug!(
                    declared = %declared,
                    detected = %probed.mime_type,
                    "Declared content type differs from probed bytes"
                );
            }
        }

        policy.check_content(&probed)?;

        // Dedup: identical bytes from the same user collapse to the record
        // that already reached a durable state.
        if let Some(existing) = self
            .store
            .find_duplicate(&request.user_id, &content_hash)
            .await?
        {
            tracing::info!(
                wallpaper_id = %existing.id,
                content_hash = %content_hash,
                "Duplicate upload collapsed to existing wallpaper"
            );
            self.heartbeats.beat("orchestrator", self.clock.now());
            return Ok(UploadResponse {
                id: existing.id.clone(),
                status: UploadStatus::AlreadyUploaded,
                wallpaper: existing,
                rate_limit,
            });
        }

        // Write-ahead intent: the row's existence means we own the id.
        let id = WallpaperId::generate();
        let intent = Wallpaper::intent(
            id.clone(),
            request.user_id.clone(),
            content_hash,
            self.clock.now(),
        );
        self.store.insert_intent(&intent).await?;

        self.machine
            .transition(&id, UploadState::Uploading, StatePatch::none())
            .await?;

        let storage_key = original_key(&id, probed.extension);
        if let Err(e) = self
            .storage
            .put(&storage_key, request.bytes.clone(), &probed.mime_type)
            .await
        {
            let reason = e.to_string();
            if let Err(mark_err) = self
                .machine
                .transition(&id, UploadState::Failed, StatePatch::error(reason))
                .await
            {
                tracing::warn!(wallpaper_id = %id, error = %mark_err, "Could not mark failed upload");
            }
            return Err(e.into());
        }

        let metadata = StatePatch {
            file_type: Some(probed.file_type),
            mime_type: Some(probed.mime_type.clone()),
            file_size_bytes: Some(request.bytes.len() as i64),
            width: Some(probed.width as i32),
            height: Some(probed.height as i32),
            aspect_ratio: Some(probed.aspect_ratio()),
            storage_key: Some(storage_key),
            storage_bucket: Some(self.storage.bucket().to_string()),
            original_filename: Some(sanitize_filename(&request.filename)),
            ..StatePatch::default()
        };
        let stored = self
            .machine
            .transition(&id, UploadState::Stored, metadata)
            .await?;

        let wallpaper = match self.announce(&stored, request.traceparent.as_deref()).await {
            Ok(()) => {
                match self
                    .machine
                    .transition(&id, UploadState::Processing, StatePatch::none())
                    .await
                {
                    Ok(updated) => updated,
                    Err(e) => {
                        tracing::warn!(
                            wallpaper_id = %id,
                            error = %e,
                            "Post-publish transition failed, record left at stored"
                        );
                        stored
                    }
                }
            }
            Err(e) => {
                // Bytes and metadata are durable, so the upload has succeeded
                // from the user's point of view. The reconciler owns the retry.
                tracing::warn!(
                    wallpaper_id = %id,
                    error = %e,
                    "Announcement failed, record left at stored"
                );
                stored
            }
        };

        self.heartbeats.beat("orchestrator", self.clock.now());

        Ok(UploadResponse {
            id,
            status: UploadStatus::Processing,
            wallpaper,
            rate_limit,
        })
    }

    async fn announce(
        &self,
        wallpaper: &Wallpaper,
        traceparent: Option<&str>,
    ) -> Result<(), AppError> {
        let event = WallpaperUploadedEvent::from_record(wallpaper, self.clock.now())?;
        let mut headers = EventHeaders::new();
        if let Some(traceparent) = traceparent {
            headers.insert(HEADER_TRACEPARENT.to_string(), traceparent.to_string());
        }
        self.bus
            .publish(
                SUBJECT_WALLPAPER_UPLOADED,
                Bytes::from(event.to_bytes()?),
                &headers,
            )
            .await?;
        Ok(())
    }
}
