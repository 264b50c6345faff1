//! Health and readiness reporting.
//!
//! Merges liveness probes of the backing systems (via [`Lifecycle`]) with
//! heartbeats from the orchestrator and the reconciler loops, plus the count
//! of records that ended up terminally failed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use wallpaperdb_core::{Clock, ErrorMetadata, Lifecycle, UploadState};
use wallpaperdb_db::WallpaperStore;

/// A loop is reported stale when its last heartbeat is older than this.
const STALE_AFTER_SECS: i64 = 30;

/// Liveness timestamps published by the background loops and the
/// orchestrator, plus the terminal-reconciliation-failure counter.
#[derive(Default)]
pub struct LoopHeartbeats {
    beats: Mutex<HashMap<&'static str, DateTime<Utc>>>,
    terminal_failures: AtomicU64,
}

impl LoopHeartbeats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self, name: &'static str, at: DateTime<Utc>) {
        self.beats.lock().expect("heartbeats poisoned").insert(name, at);
    }

    pub fn last_beat(&self, name: &str) -> Option<DateTime<Utc>> {
        self.beats
            .lock()
            .expect("heartbeats poisoned")
            .get(name)
            .copied()
    }

    /// Called when the reconciler surrenders a record after exhausting its
    /// attempt bound.
    pub fn record_terminal_failure(&self) {
        self.terminal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn terminal_failures(&self) -> u64 {
        self.terminal_failures.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Vec<(&'static str, DateTime<Utc>)> {
        let mut beats: Vec<_> = self
            .beats
            .lock()
            .expect("heartbeats poisoned")
            .iter()
            .map(|(name, at)| (*name, *at))
            .collect();
        beats.sort_by_key(|(name, _)| *name);
        beats
    }
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoopHealth {
    pub name: &'static str,
    pub last_beat: DateTime<Utc>,
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub ready: bool,
    pub components: Vec<ComponentHealth>,
    pub loops: Vec<LoopHealth>,
    /// Records currently in `failed`.
    pub failed_wallpapers: i64,
    /// Records the reconciler gave up on since startup.
    pub terminal_reconcile_failures: u64,
}

pub struct HealthService {
    components: Vec<Arc<dyn Lifecycle>>,
    heartbeats: Arc<LoopHeartbeats>,
    store: Arc<dyn WallpaperStore>,
    clock: Arc<dyn Clock>,
}

impl HealthService {
    pub fn new(
        components: Vec<Arc<dyn Lifecycle>>,
        heartbeats: Arc<LoopHeartbeats>,
        store: Arc<dyn WallpaperStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            components,
            heartbeats,
            store,
            clock,
        }
    }

    pub async fn report(&self) -> HealthReport {
        let now = self.clock.now();

        let mut components = Vec::with_capacity(self.components.len());
        for component in &self.components {
            match component.health().await {
                Ok(()) => components.push(ComponentHealth {
                    name: component.name(),
                    healthy: true,
                    error: None,
                }),
                Err(e) => components.push(ComponentHealth {
                    name: component.name(),
                    healthy: false,
                    error: Some(e.client_message()),
                }),
            }
        }

        let loops: Vec<LoopHealth> = self
            .heartbeats
            .snapshot()
            .into_iter()
            .map(|(name, last_beat)| LoopHealth {
                name,
                last_beat,
                stale: now - last_beat > Duration::seconds(STALE_AFTER_SECS),
            })
            .collect();

        let failed_wallpapers = self
            .store
            .count_in_state(UploadState::Failed)
            .await
            .unwrap_or(-1);

        let ready = components.iter().all(|c| c.healthy) && loops.iter().all(|l| !l.stale);

        HealthReport {
            ready,
            components,
            loops,
            failed_wallpapers,
            terminal_reconcile_failures: self.heartbeats.terminal_failures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wallpaperdb_core::{AppError, ManualClock};
    use wallpaperdb_db::MemoryWallpaperStore;

    struct FakeComponent {
        healthy: bool,
    }

    #[async_trait]
    impl Lifecycle for FakeComponent {
        fn name(&self) -> &'static str {
            "fake"
        }
        async fn health(&self) -> Result<(), AppError> {
            if self.healthy {
                Ok(())
            } else {
                Err(AppError::Storage("down".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_ready_when_components_healthy_and_loops_fresh() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let heartbeats = Arc::new(LoopHeartbeats::new());
        heartbeats.beat("stuck-uploads", clock.now());

        let service = HealthService::new(
            vec![Arc::new(FakeComponent { healthy: true })],
            heartbeats,
            Arc::new(MemoryWallpaperStore::new()),
            clock,
        );
        let report = service.report().await;
        assert!(report.ready);
        assert_eq!(report.failed_wallpapers, 0);
    }

    #[tokio::test]
    async fn test_unhealthy_component_blocks_readiness() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = HealthService::new(
            vec![Arc::new(FakeComponent { healthy: false })],
            Arc::new(LoopHeartbeats::new()),
            Arc::new(MemoryWallpaperStore::new()),
            clock,
        );
        let report = service.report().await;
        assert!(!report.ready);
        assert!(!report.components[0].healthy);
    }

    #[tokio::test]
    async fn test_stale_loop_blocks_readiness() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let heartbeats = Arc::new(LoopHeartbeats::new());
        heartbeats.beat("stuck-uploads", clock.now());
        clock.advance(Duration::seconds(STALE_AFTER_SECS + 1));

        let service = HealthService::new(
            vec![],
            heartbeats,
            Arc::new(MemoryWallpaperStore::new()),
            clock,
        );
        let report = service.report().await;
        assert!(!report.ready);
        assert!(report.loops[0].stale);
    }
}
