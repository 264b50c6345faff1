//! Periodic reconciler.
//!
//! Three independent loops bring state back into consistency after partial
//! failures: stuck uploads are advanced or failed, missing announcements are
//! republished, and orphaned intents and objects are swept. Every action is
//! compare-and-act: the state machine's CAS makes a pass that lost a race a
//! no-op rather than an overwrite.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Duration as ChronoDuration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use wallpaperdb_core::config::ReconcileConfig;
use wallpaperdb_core::events::{WallpaperUploadedEvent, SUBJECT_WALLPAPER_UPLOADED};
use wallpaperdb_core::{probe, AppError, Clock, StatePatch, UploadState, Wallpaper};
use wallpaperdb_db::{StateMachine, WallpaperStore};
use wallpaperdb_events::{EventBus, EventHeaders};
use wallpaperdb_storage::{wallpaper_id_for_key, ObjectEntry, ObjectStorage};

use crate::health::LoopHeartbeats;

/// Upper bound on records handled per pass; the next tick picks up the rest.
const SCAN_BATCH_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy)]
enum LoopKind {
    StuckUploads,
    MissingAnnouncements,
    OrphanSweep,
}

pub struct Reconciler {
    store: Arc<dyn WallpaperStore>,
    machine: StateMachine,
    storage: Arc<dyn ObjectStorage>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: ReconcileConfig,
    heartbeats: Arc<LoopHeartbeats>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn WallpaperStore>,
        machine: StateMachine,
        storage: Arc<dyn ObjectStorage>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: ReconcileConfig,
        heartbeats: Arc<LoopHeartbeats>,
    ) -> Self {
        Self {
            store,
            machine,
            storage,
            bus,
            clock,
            config,
            heartbeats,
        }
    }

    /// Spawn the three loops. Each honors the shutdown signal: the in-flight
    /// pass finishes, the next one is not scheduled.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            self.clone().spawn_loop(
                "stuck-uploads",
                LoopKind::StuckUploads,
                self.config.stuck_upload_interval_ms,
                shutdown.clone(),
            ),
            self.clone().spawn_loop(
                "missing-announcements",
                LoopKind::MissingAnnouncements,
                self.config.missing_event_interval_ms,
                shutdown.clone(),
            ),
            self.clone().spawn_loop(
                "orphan-sweep",
                LoopKind::OrphanSweep,
                self.config.orphan_sweep_interval_ms,
                shutdown,
            ),
        ]
    }

    fn spawn_loop(
        self: Arc<Self>,
        name: &'static str,
        kind: LoopKind,
        period_ms: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(period_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let result = match kind {
                    LoopKind::StuckUploads => self.run_stuck_uploads_pass().await,
                    LoopKind::MissingAnnouncements => {
                        self.run_missing_announcements_pass().await
                    }
                    LoopKind::OrphanSweep => self.run_orphan_sweep_pass().await,
                };

                match result {
                    Ok(0) => {}
                    Ok(acted) => {
                        tracing::info!(pass = name, acted, "Reconciler pass completed")
                    }
                    Err(e) => tracing::error!(pass = name, error = %e, "Reconciler pass failed"),
                }

                self.heartbeats.beat(name, self.clock.now());
            }
            tracing::info!(pass = name, "Reconciler loop stopped");
        })
    }

    fn cutoff(&self, age_ms: u64) -> chrono::DateTime<chrono::Utc> {
        self.clock.now() - ChronoDuration::milliseconds(age_ms as i64)
    }

    /// Loop A: records stuck in `uploading` past the grace period. If their
    /// object made it to storage the upload is finished forward; otherwise
    /// the record is failed.
    pub async fn run_stuck_uploads_pass(&self) -> Result<usize, AppError> {
        let stuck = self
            .store
            .list_in_state_older_than(
                UploadState::Uploading,
                self.cutoff(self.config.stuck_upload_age_ms),
                SCAN_BATCH_LIMIT,
            )
            .await?;

        let mut acted = 0;
        for wallpaper in stuck {
            if wallpaper.upload_attempts >= self.config.max_attempts {
                self.surrender(&wallpaper).await;
                acted += 1;
                continue;
            }
            match self.repair_stuck_upload(&wallpaper).await {
                Ok(()) => acted += 1,
                Err(AppError::ConcurrentTransition { .. }) => {
                    tracing::debug!(wallpaper_id = %wallpaper.id, "Another writer repaired this record first");
                }
                Err(e) => {
                    tracing::warn!(wallpaper_id = %wallpaper.id, error = %e, "Stuck upload repair failed");
                    self.touch(&wallpaper).await;
                }
            }
        }
        Ok(acted)
    }

    async fn repair_stuck_upload(&self, wallpaper: &Wallpaper) -> Result<(), AppError> {
        // The extension is unknown until `stored`, so look for any original
        // object under the id's prefix.
        let prefix = format!("{}/", wallpaper.id);
        let objects = self.storage.list(Some(&prefix)).await?;
        let original = objects.into_iter().find(|entry| {
            entry
                .key
                .rsplit('/')
                .next()
                .is_some_and(|name| name.starts_with("original."))
        });

        match original {
            Some(entry) => {
                let patch = if wallpaper.has_complete_metadata() {
                    StatePatch {
                        bump_attempts: true,
                        ..StatePatch::default()
                    }
                } else {
                    self.rebuild_metadata(&entry).await?
                };
                self.machine
                    .transition(&wallpaper.id, UploadState::Stored, patch)
                    .await?;
                tracing::info!(
                    wallpaper_id = %wallpaper.id,
                    key = %entry.key,
                    "Stuck upload advanced to stored"
                );
            }
            None => {
                self.machine
                    .transition(
                        &wallpaper.id,
                        UploadState::Failed,
                        StatePatch {
                            processing_error: Some("upload never completed".to_string()),
                            bump_attempts: true,
                            ..StatePatch::default()
                        },
                    )
                    .await?;
                tracing::info!(
                    wallpaper_id = %wallpaper.id,
                    "Stuck upload with no stored object marked failed"
                );
            }
        }
        Ok(())
    }

    /// Re-derive the metadata patch from the stored object itself.
    async fn rebuild_metadata(&self, entry: &ObjectEntry) -> Result<StatePatch, AppError> {
        let data = self.storage.get(&entry.key).await?;
        let probed = tokio::task::spawn_blocking(move || probe(&data))
            .await
            .map_err(|e| AppError::Internal(format!("Probe task failed: {}", e)))??;

        Ok(StatePatch {
            file_type: Some(probed.file_type),
            mime_type: Some(probed.mime_type.clone()),
            file_size_bytes: Some(entry.size as i64),
            width: Some(probed.width as i32),
            height: Some(probed.height as i32),
            aspect_ratio: Some(probed.aspect_ratio()),
            storage_key: Some(entry.key.clone()),
            storage_bucket: Some(self.storage.bucket().to_string()),
            bump_attempts: true,
            ..StatePatch::default()
        })
    }

    /// Loop B: records parked in `stored` past the grace period get their
    /// `wallpaper.uploaded` event republished. At-least-once: a consumer may
    /// see the event twice.
    pub async fn run_missing_announcements_pass(&self) -> Result<usize, AppError> {
        let stalled = self
            .store
            .list_in_state_older_than(
                UploadState::Stored,
                self.cutoff(self.config.missing_event_age_ms),
                SCAN_BATCH_LIMIT,
            )
            .await?;

        let mut acted = 0;
        for wallpaper in stalled {
            if wallpaper.upload_attempts >= self.config.max_attempts {
                self.surrender(&wallpaper).await;
                acted += 1;
                continue;
            }
            if !wallpaper.has_complete_metadata() {
                tracing::warn!(
                    wallpaper_id = %wallpaper.id,
                    "Stored record is missing metadata fields, cannot announce"
                );
                self.touch(&wallpaper).await;
                continue;
            }
            match self.republish(&wallpaper).await {
                Ok(()) => acted += 1,
                Err(AppError::ConcurrentTransition { .. }) => {
                    tracing::debug!(wallpaper_id = %wallpaper.id, "Another writer announced this record first");
                }
                Err(e) => {
                    tracing::warn!(wallpaper_id = %wallpaper.id, error = %e, "Republish failed");
                    self.touch(&wallpaper).await;
                }
            }
        }
        Ok(acted)
    }

    async fn republish(&self, wallpaper: &Wallpaper) -> Result<(), AppError> {
        let event = WallpaperUploadedEvent::from_record(wallpaper, self.clock.now())?;
        self.bus
            .publish(
                SUBJECT_WALLPAPER_UPLOADED,
                Bytes::from(event.to_bytes()?),
                &EventHeaders::new(),
            )
            .await?;
        self.machine
            .transition(
                &wallpaper.id,
                UploadState::Processing,
                StatePatch {
                    bump_attempts: true,
                    ..StatePatch::default()
                },
            )
            .await?;
        tracing::info!(wallpaper_id = %wallpaper.id, "Missing announcement republished");
        Ok(())
    }

    /// Loop C: sweep aborted intents and unowned objects.
    pub async fn run_orphan_sweep_pass(&self) -> Result<usize, AppError> {
        let mut acted = 0;

        // Aborted intents: still `initiated` after the grace period means no
        // bytes ever arrived. Only this state is ever deletable.
        let intents = self
            .store
            .list_in_state_older_than(
                UploadState::Initiated,
                self.cutoff(self.config.orphan_intent_age_ms),
                SCAN_BATCH_LIMIT,
            )
            .await?;
        for wallpaper in intents {
            if self
                .store
                .delete_in_state(&wallpaper.id, UploadState::Initiated)
                .await?
            {
                acted += 1;
                tracing::info!(wallpaper_id = %wallpaper.id, "Orphan intent deleted");
            }
        }

        // Unowned objects. The orchestrator always inserts the record before
        // any put, so a key whose implied id has no record is an orphan. A
        // record in any state (failed included) referencing the key keeps the
        // object for forensic access.
        for entry in self.storage.list(None).await? {
            let Some(id) = wallpaper_id_for_key(&entry.key) else {
                continue;
            };
            if self.store.get(&id).await?.is_some() {
                continue;
            }
            if self.store.storage_key_referenced(&entry.key).await? {
                continue;
            }
            self.storage.delete(&entry.key).await?;
            acted += 1;
            tracing::info!(key = %entry.key, "Orphan object deleted");
        }

        Ok(acted)
    }

    /// Give up on a record that exhausted its reconciliation attempts: leave
    /// it `failed` and count it for the health surface.
    async fn surrender(&self, wallpaper: &Wallpaper) {
        let reason = format!(
            "reconciliation attempts exhausted after {} tries",
            wallpaper.upload_attempts
        );
        match self
            .machine
            .transition(
                &wallpaper.id,
                UploadState::Failed,
                StatePatch {
                    processing_error: Some(reason),
                    bump_attempts: true,
                    ..StatePatch::default()
                },
            )
            .await
        {
            Ok(_) => {
                self.heartbeats.record_terminal_failure();
                tracing::error!(
                    wallpaper_id = %wallpaper.id,
                    attempts = wallpaper.upload_attempts,
                    "Record surrendered after repeated reconciliation failures"
                );
            }
            Err(e) => {
                tracing::warn!(wallpaper_id = %wallpaper.id, error = %e, "Could not surrender record");
            }
        }
    }

    /// Record a failed reconciliation attempt without a state change. The
    /// refreshed `state_changed_at` backs the record off for one more grace
    /// period before the next try.
    async fn touch(&self, wallpaper: &Wallpaper) {
        let patch = StatePatch {
            bump_attempts: true,
            ..StatePatch::default()
        };
        if let Err(e) = self
            .store
            .update_transition(
                &wallpaper.id,
                wallpaper.upload_state,
                wallpaper.upload_state,
                &patch,
                self.clock.now(),
            )
            .await
        {
            tracing::warn!(wallpaper_id = %wallpaper.id, error = %e, "Failed to record reconciliation attempt");
        }
    }
}
