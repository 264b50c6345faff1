//! Wallpaper store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use wallpaperdb_core::{AppError, ContentHash, StatePatch, UploadState, Wallpaper, WallpaperId};

/// Transactional CRUD on the wallpaper table, plus the scan queries the
/// reconciler runs.
#[async_trait]
pub trait WallpaperStore: Send + Sync {
    /// Insert a fresh record in `initiated` - the write-ahead intent entry.
    async fn insert_intent(&self, wallpaper: &Wallpaper) -> Result<(), AppError>;

    async fn get(&self, id: &WallpaperId) -> Result<Option<Wallpaper>, AppError>;

    /// Look up `(user_id, content_hash)` among records in durable states.
    /// This is the dedup query: in-flight and failed attempts never match.
    async fn find_duplicate(
        &self,
        user_id: &str,
        content_hash: &ContentHash,
    ) -> Result<Option<Wallpaper>, AppError>;

    /// Compare-and-set state update. Writes `new_state`, stamps
    /// `state_changed_at`/`updated_at` with `now`, and applies `patch` in the
    /// same update. Returns the updated record, or `None` when the row was no
    /// longer in `expected` (a concurrent writer won).
    async fn update_transition(
        &self,
        id: &WallpaperId,
        expected: UploadState,
        new_state: UploadState,
        patch: &StatePatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallpaper>, AppError>;

    /// Delete the record only if it is still in `expected`. Returns whether a
    /// row was deleted. Used solely by the orphan-intent sweep.
    async fn delete_in_state(
        &self,
        id: &WallpaperId,
        expected: UploadState,
    ) -> Result<bool, AppError>;

    /// Records in `state` whose last transition is older than `cutoff`,
    /// oldest first.
    async fn list_in_state_older_than(
        &self,
        state: UploadState,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Wallpaper>, AppError>;

    /// Whether any record (any state, including `failed`) references this
    /// storage key. Guards the orphan-object sweep.
    async fn storage_key_referenced(&self, key: &str) -> Result<bool, AppError>;

    /// Number of records currently in `state`. Surfaced via health metrics.
    async fn count_in_state(&self, state: UploadState) -> Result<i64, AppError>;
}
