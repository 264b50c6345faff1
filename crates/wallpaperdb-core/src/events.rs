//! Wire types for the wallpaper event stream.
//!
//! The `wallpaper.uploaded` envelope is the contract between the ingestion
//! pipeline and downstream consumers (variant worker, search indexer, media
//! gateway). Unknown fields on ingress are ignored; unknown event types are
//! skipped by consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{FileType, Wallpaper};

/// Subject of upload announcements.
pub const SUBJECT_WALLPAPER_UPLOADED: &str = "wallpaper.uploaded";
/// Subject filter covering every wallpaper event.
pub const SUBJECT_WALLPAPER_ALL: &str = "wallpaper.>";
/// Dead-letter subject for messages that exhausted redelivery.
pub const SUBJECT_WALLPAPER_DLQ: &str = "wallpaper.dlq";
/// W3C trace-context header propagated through the bus when present.
pub const HEADER_TRACEPARENT: &str = "traceparent";

pub const EVENT_TYPE_WALLPAPER_UPLOADED: &str = "wallpaper.uploaded";

/// `wallpaper.uploaded` event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WallpaperUploadedEvent {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub wallpaper: WallpaperPayload,
}

/// Wallpaper metadata carried in the envelope. All fields are the
/// non-nullable projection of a record in a durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WallpaperPayload {
    pub id: String,
    pub user_id: String,
    pub file_type: FileType,
    pub mime_type: String,
    pub file_size_bytes: i64,
    pub width: i32,
    pub height: i32,
    pub aspect_ratio: f64,
    pub storage_key: String,
    pub storage_bucket: String,
    pub original_filename: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl WallpaperUploadedEvent {
    /// Build the envelope from a record with complete metadata.
    ///
    /// Fails with `Internal` if any required field is missing; callers check
    /// [`Wallpaper::has_complete_metadata`] before attempting to publish.
    pub fn from_record(wallpaper: &Wallpaper, timestamp: DateTime<Utc>) -> Result<Self, AppError> {
        let missing =
            || AppError::Internal(format!("Wallpaper {} has incomplete metadata", wallpaper.id));
        Ok(Self {
            event_id: Uuid::now_v7().to_string(),
            event_type: EVENT_TYPE_WALLPAPER_UPLOADED.to_string(),
            timestamp,
            wallpaper: WallpaperPayload {
                id: wallpaper.id.to_string(),
                user_id: wallpaper.user_id.clone(),
                file_type: wallpaper.file_type.ok_or_else(missing)?,
                mime_type: wallpaper.mime_type.clone().ok_or_else(missing)?,
                file_size_bytes: wallpaper.file_size_bytes.ok_or_else(missing)?,
                width: wallpaper.width.ok_or_else(missing)?,
                height: wallpaper.height.ok_or_else(missing)?,
                aspect_ratio: wallpaper.aspect_ratio.ok_or_else(missing)?,
                storage_key: wallpaper.storage_key.clone().ok_or_else(missing)?,
                storage_bucket: wallpaper.storage_bucket.clone().ok_or_else(missing)?,
                original_filename: wallpaper.original_filename.clone(),
                uploaded_at: wallpaper.uploaded_at,
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
