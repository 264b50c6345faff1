//! In-memory wallpaper store for tests.
//!
//! Mirrors the SQL semantics of the Postgres store, including the
//! compare-and-set transition, under a single mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use wallpaperdb_core::{
    AppError, ContentHash, StatePatch, UploadState, Wallpaper, WallpaperId,
};

use crate::store::WallpaperStore;

#[derive(Default)]
pub struct MemoryWallpaperStore {
    records: Mutex<HashMap<WallpaperId, Wallpaper>>,
}

impl MemoryWallpaperStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct insert of an arbitrary record, bypassing the intent path.
    /// Tests use this to seed stuck or orphaned states.
    pub fn seed(&self, wallpaper: Wallpaper) {
        self.records
            .lock()
            .expect("store poisoned")
            .insert(wallpaper.id.clone(), wallpaper);
    }

    pub fn snapshot(&self) -> Vec<Wallpaper> {
        self.records
            .lock()
            .expect("store poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WallpaperStore for MemoryWallpaperStore {
    async fn insert_intent(&self, wallpaper: &Wallpaper) -> Result<(), AppError> {
        let mut records = self.records.lock().expect("store poisoned");
        if records.contains_key(&wallpaper.id) {
            return Err(AppError::Internal(format!(
                "Duplicate wallpaper id: {}",
                wallpaper.id
            )));
        }
        records.insert(wallpaper.id.clone(), wallpaper.clone());
        Ok(())
    }

    async fn get(&self, id: &WallpaperId) -> Result<Option<Wallpaper>, AppError> {
        Ok(self
            .records
            .lock()
            .expect("store poisoned")
            .get(id)
            .cloned())
    }

    async fn find_duplicate(
        &self,
        user_id: &str,
        content_hash: &ContentHash,
    ) -> Result<Option<Wallpaper>, AppError> {
        Ok(self
            .records
            .lock()
            .expect("store poisoned")
            .values()
            .find(|w| {
                w.user_id == user_id
                    && &w.content_hash == content_hash
                    && w.upload_state.is_durable()
            })
            .cloned())
    }

    async fn update_transition(
        &self,
        id: &WallpaperId,
        expected: UploadState,
        new_state: UploadState,
        patch: &StatePatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallpaper>, AppError> {
        let mut records = self.records.lock().expect("store poisoned");
        match records.get_mut(id) {
            Some(wallpaper) if wallpaper.upload_state == expected => {
                wallpaper.upload_state = new_state;
                wallpaper.state_changed_at = now;
                wallpaper.updated_at = now;
                patch.apply_to(wallpaper);
                Ok(Some(wallpaper.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_in_state(
        &self,
        id: &WallpaperId,
        expected: UploadState,
    ) -> Result<bool, AppError> {
        let mut records = self.records.lock().expect("store poisoned");
        match records.get(id) {
            Some(wallpaper) if wallpaper.upload_state == expected => {
                records.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_in_state_older_than(
        &self,
        state: UploadState,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Wallpaper>, AppError> {
        let records = self.records.lock().expect("store poisoned");
        let mut matching: Vec<Wallpaper> = records
            .values()
            .filter(|w| w.upload_state == state && w.state_changed_at < cutoff)
            .cloned()
            .collect();
        matching.sort_by_key(|w| w.state_changed_at);
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn storage_key_referenced(&self, key: &str) -> Result<bool, AppError> {
        Ok(self
            .records
            .lock()
            .expect("store poisoned")
            .values()
            .any(|w| w.storage_key.as_deref() == Some(key)))
    }

    async fn count_in_state(&self, state: UploadState) -> Result<i64, AppError> {
        Ok(self
            .records
            .lock()
            .expect("store poisoned")
            .values()
            .filter(|w| w.upload_state == state)
            .count() as i64)
    }
}
