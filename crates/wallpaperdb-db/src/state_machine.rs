//! Upload state machine.
//!
//! Wraps the wallpaper store with edge validation. The machine performs no
//! business logic beyond checking that the requested transition is legal;
//! callers supply the field patch.

use std::sync::Arc;

use wallpaperdb_core::{AppError, Clock, StatePatch, UploadState, Wallpaper, WallpaperId};

use crate::store::WallpaperStore;

#[derive(Clone)]
pub struct StateMachine {
    store: Arc<dyn WallpaperStore>,
    clock: Arc<dyn Clock>,
}

impl StateMachine {
    pub fn new(store: Arc<dyn WallpaperStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn current_state(&self, id: &WallpaperId) -> Result<UploadState, AppError> {
        let wallpaper = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Wallpaper {} not found", id)))?;
        Ok(wallpaper.upload_state)
    }

    /// Atomically validate and perform `current -> new_state`, applying
    /// `patch` in the same update.
    ///
    /// A concurrent writer that advanced the record first makes our loaded
    /// state stale; the CAS then matches nothing and we fail with
    /// `ConcurrentTransition` so the caller can reload and decide anew.
    pub async fn transition(
        &self,
        id: &WallpaperId,
        new_state: UploadState,
        patch: StatePatch,
    ) -> Result<Wallpaper, AppError> {
        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Wallpaper {} not found", id)))?;

        if !current.upload_state.can_transition_to(new_state) {
            return Err(AppError::InvalidStateTransition {
                from: current.upload_state,
                to: new_state,
            });
        }

        match self
            .store
            .update_transition(id, current.upload_state, new_state, &patch, self.clock.now())
            .await?
        {
            Some(updated) => {
                tracing::debug!(
                    wallpaper_id = %id,
                    from = %current.upload_state,
                    to = %new_state,
                    "State transition applied"
                );
                Ok(updated)
            }
            None => Err(AppError::ConcurrentTransition { id: id.to_string() }),
        }
    }
}
