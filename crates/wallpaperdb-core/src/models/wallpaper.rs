//! Wallpaper record and upload lifecycle types.
//!
//! The wallpaper row is the write-ahead log of the ingestion pipeline: a row
//! in `initiated` marks the reservation of an id before any bytes are
//! uploaded, and every later step advances `upload_state` along the edges
//! defined by [`UploadState::can_transition_to`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::hash::ContentHash;

/// Prefix of every wallpaper id.
pub const WALLPAPER_ID_PREFIX: &str = "wlpr_";

/// Opaque, lexicographically sortable wallpaper id (`wlpr_<uuid v7 hex>`).
///
/// UUID v7 is time-ordered, so ids generated later sort later. The id is
/// generated at intent time and doubles as the first path segment of the
/// storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct WallpaperId(String);

impl WallpaperId {
    pub fn generate() -> Self {
        Self(format!("{}{}", WALLPAPER_ID_PREFIX, Uuid::now_v7().simple()))
    }

    /// Parse an id from its string form, validating prefix and charset.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        let suffix = s
            .strip_prefix(WALLPAPER_ID_PREFIX)
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid wallpaper id: {}", s)))?;
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::InvalidInput(format!("Invalid wallpaper id: {}", s)));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WallpaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upload lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "upload_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Initiated,
    Uploading,
    Stored,
    Processing,
    Completed,
    Failed,
}

impl UploadState {
    /// States in which the object is durable, metadata is complete, and the
    /// per-user content-hash uniqueness constraint applies.
    pub const DURABLE: [UploadState; 3] = [
        UploadState::Stored,
        UploadState::Processing,
        UploadState::Completed,
    ];

    /// Whether the edge `self -> next` is legal.
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Initiated, Uploading)
                | (Initiated, Failed)
                | (Uploading, Stored)
                | (Uploading, Failed)
                | (Stored, Processing)
                | (Stored, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Failed)
    }

    /// Whether the state counts for deduplication and requires the stored
    /// object to exist.
    pub fn is_durable(self) -> bool {
        Self::DURABLE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadState::Initiated => "initiated",
            UploadState::Uploading => "uploading",
            UploadState::Stored => "stored",
            UploadState::Processing => "processing",
            UploadState::Completed => "completed",
            UploadState::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File type enum. Video is carried by the data model but rejected by the
/// probe in this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "file_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
}

/// Wallpaper record, owned by the metadata store.
///
/// Metadata columns (`file_type` through `original_filename`) are nullable
/// until the record reaches `stored`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallpaper {
    pub id: WallpaperId,
    pub user_id: String,
    pub content_hash: ContentHash,
    pub upload_state: UploadState,
    pub state_changed_at: DateTime<Utc>,
    pub upload_attempts: i32,
    pub processing_error: Option<String>,
    pub file_type: Option<FileType>,
    pub mime_type: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub aspect_ratio: Option<f64>,
    pub storage_key: Option<String>,
    pub storage_bucket: Option<String>,
    pub original_filename: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallpaper {
    /// A new record in `initiated`, the write-ahead intent entry.
    pub fn intent(
        id: WallpaperId,
        user_id: String,
        content_hash: ContentHash,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            content_hash,
            upload_state: UploadState::Initiated,
            state_changed_at: now,
            upload_attempts: 0,
            processing_error: None,
            file_type: None,
            mime_type: None,
            file_size_bytes: None,
            width: None,
            height: None,
            aspect_ratio: None,
            storage_key: None,
            storage_bucket: None,
            original_filename: None,
            uploaded_at: now,
            updated_at: now,
        }
    }

    /// Whether every metadata field required in durable states is present.
    /// Precondition for publishing the `wallpaper.uploaded` event.
    pub fn has_complete_metadata(&self) -> bool {
        self.file_type.is_some()
            && self.mime_type.is_some()
            && self.file_size_bytes.is_some()
            && self.width.is_some()
            && self.height.is_some()
            && self.aspect_ratio.is_some()
            && self.storage_key.is_some()
            && self.storage_bucket.is_some()
    }
}

/// Field patch applied atomically together with a state transition.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub file_type: Option<FileType>,
    pub mime_type: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub aspect_ratio: Option<f64>,
    pub storage_key: Option<String>,
    pub storage_bucket: Option<String>,
    pub original_filename: Option<String>,
    pub processing_error: Option<String>,
    /// Increment `upload_attempts` as part of the update.
    pub bump_attempts: bool,
}

impl StatePatch {
    pub fn none() -> Self {
        Self::default()
    }

    /// Patch used when a step fails and the record moves to `failed`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            processing_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Apply this patch to an in-memory record (the memory store and tests
    /// mirror what the SQL UPDATE does).
    pub fn apply_to(&self, wallpaper: &mut Wallpaper) {
        if let Some(v) = self.file_type {
            wallpaper.file_type = Some(v);
        }
        if let Some(ref v) = self.mime_type {
            wallpaper.mime_type = Some(v.clone());
        }
        if let Some(v) = self.file_size_bytes {
            wallpaper.file_size_bytes = Some(v);
        }
        if let Some(v) = self.width {
            wallpaper.width = Some(v);
        }
        if let Some(v) = self.height {
            wallpaper.height = Some(v);
        }
        if let Some(v) = self.aspect_ratio {
            wallpaper.aspect_ratio = Some(v);
        }
        if let Some(ref v) = self.storage_key {
            wallpaper.storage_key = Some(v.clone());
        }
        if let Some(ref v) = self.storage_bucket {
            wallpaper.storage_bucket = Some(v.clone());
        }
        if let Some(ref v) = self.original_filename {
            wallpaper.original_filename = Some(v.clone());
        }
        if let Some(ref v) = self.processing_error {
            wallpaper.processing_error = Some(v.clone());
        }
        if self.bump_attempts {
            wallpaper.upload_attempts += 1;
        }
    }
}

/// Aspect ratio rounded to 4 decimals, as persisted and announced.
pub fn aspect_ratio(width: u32, height: u32) -> f64 {
    (width as f64 / height as f64 * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation_is_sortable_and_parses() {
        let a = WallpaperId::generate();
        // v7 ids embed a millisecond timestamp in their most significant bits
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = WallpaperId::generate();
        assert!(a.as_str().starts_with(WALLPAPER_ID_PREFIX));
        assert!(a.as_str() < b.as_str());
        assert_eq!(WallpaperId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn test_id_parse_rejects_garbage() {
        assert!(WallpaperId::parse("wlpr_").is_err());
        assert!(WallpaperId::parse("img_0123").is_err());
        assert!(WallpaperId::parse("wlpr_../etc/passwd").is_err());
    }

    #[test]
    fn test_legal_transitions() {
        use UploadState::*;
        let legal = [
            (Initiated, Uploading),
            (Initiated, Failed),
            (Uploading, Stored),
            (Uploading, Failed),
            (Stored, Processing),
            (Stored, Failed),
            (Processing, Completed),
            (Processing, Failed),
        ];
        let all = [Initiated, Uploading, Stored, Processing, Completed, Failed];
        for from in all {
            for to in all {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "edge {} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        use UploadState::*;
        for to in [Initiated, Uploading, Stored, Processing, Completed, Failed] {
            assert!(!Completed.can_transition_to(to));
            assert!(!Failed.can_transition_to(to));
        }
    }

    #[test]
    fn test_aspect_ratio_rounding() {
        assert_eq!(aspect_ratio(1920, 1080), 1.7778);
        assert_eq!(aspect_ratio(1000, 1000), 1.0);
        assert_eq!(aspect_ratio(1080, 1920), 0.5625);
    }

    #[test]
    fn test_intent_has_no_metadata() {
        let w = Wallpaper::intent(
            WallpaperId::generate(),
            "u1".into(),
            ContentHash::of(b"bytes"),
            Utc::now(),
        );
        assert_eq!(w.upload_state, UploadState::Initiated);
        assert_eq!(w.upload_attempts, 0);
        assert!(!w.has_complete_metadata());
    }

    #[test]
    fn test_patch_apply() {
        let mut w = Wallpaper::intent(
            WallpaperId::generate(),
            "u1".into(),
            ContentHash::of(b"bytes"),
            Utc::now(),
        );
        let patch = StatePatch {
            mime_type: Some("image/png".into()),
            width: Some(1920),
            height: Some(1080),
            bump_attempts: true,
            ..StatePatch::default()
        };
        patch.apply_to(&mut w);
        assert_eq!(w.mime_type.as_deref(), Some("image/png"));
        assert_eq!(w.upload_attempts, 1);
        assert!(w.file_size_bytes.is_none());
    }
}
