//! Shared harness for the integration suite.
//!
//! Wires the orchestrator and reconciler against the in-memory store,
//! storage, and bus, with a manually advanced clock so grace periods are
//! crossed without sleeping.

pub mod fixtures;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use wallpaperdb_core::config::{RateLimitConfig, ReconcileConfig};
use wallpaperdb_core::{
    Clock, ContentHash, ManualClock, StatePatch, UploadPolicies, UploadState, ValidationPolicy,
    Wallpaper, WallpaperId,
};
use wallpaperdb_db::{MemoryWallpaperStore, StateMachine, WallpaperStore};
use wallpaperdb_events::{EventBus, MemoryEventBus};
use wallpaperdb_ingest::{
    InMemoryRateLimitStore, LoopHeartbeats, RateLimiter, Reconciler, UploadOrchestrator,
    UploadRequest,
};
use wallpaperdb_storage::{ObjectEntry, ObjectStorage, StorageError, StorageResult};
use wallpaperdb_storage::MemoryStorage;

/// Storage wrapper with a put-failure switch for outage scenarios.
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_puts: AtomicBool,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new("wallpapers"),
            fail_puts: AtomicBool::new(false),
        }
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStorage for FailingStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("simulated outage".to_string()));
        }
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        self.inner.content_length(key).await
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<ObjectEntry>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    fn bucket(&self) -> &str {
        self.inner.bucket()
    }
}

pub struct HarnessConfig {
    pub rate_max: u32,
    pub rate_window_ms: u64,
    pub max_file_size_bytes: u64,
    pub max_concurrent_uploads: usize,
    pub reconcile_max_attempts: i32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            rate_max: 1_000,
            rate_window_ms: 60_000,
            max_file_size_bytes: 50 * 1024 * 1024,
            max_concurrent_uploads: 16,
            reconcile_max_attempts: 5,
        }
    }
}

pub struct Harness {
    pub store: Arc<MemoryWallpaperStore>,
    pub storage: Arc<FailingStorage>,
    pub bus: Arc<MemoryEventBus>,
    pub clock: Arc<ManualClock>,
    pub heartbeats: Arc<LoopHeartbeats>,
    pub orchestrator: UploadOrchestrator,
    pub reconciler: Reconciler,
}

pub fn harness() -> Harness {
    harness_with(HarnessConfig::default())
}

pub fn harness_with(config: HarnessConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let heartbeats = Arc::new(LoopHeartbeats::new());

    let store = Arc::new(MemoryWallpaperStore::new());
    let store_dyn: Arc<dyn WallpaperStore> = store.clone();

    let storage = Arc::new(FailingStorage::new());
    let storage_dyn: Arc<dyn ObjectStorage> = storage.clone();

    let bus = Arc::new(MemoryEventBus::new(5));
    let bus_dyn: Arc<dyn EventBus> = bus.clone();

    let rate_config = RateLimitConfig {
        max: config.rate_max,
        window_ms: config.rate_window_ms,
        redis_url: None,
    };
    let rate_limiter = RateLimiter::new(
        Arc::new(InMemoryRateLimitStore::new(clock_dyn.clone())),
        clock_dyn.clone(),
        &rate_config,
    );

    let machine = StateMachine::new(store_dyn.clone(), clock_dyn.clone());
    let policies = UploadPolicies::new(ValidationPolicy {
        max_file_size_bytes: config.max_file_size_bytes,
        ..ValidationPolicy::default()
    });

    let reconcile_config = ReconcileConfig {
        stuck_upload_age_ms: 10 * 60 * 1000,
        missing_event_age_ms: 5 * 60 * 1000,
        orphan_intent_age_ms: 60 * 60 * 1000,
        stuck_upload_interval_ms: 1_000,
        missing_event_interval_ms: 1_000,
        orphan_sweep_interval_ms: 2_000,
        max_attempts: config.reconcile_max_attempts,
    };

    let orchestrator = UploadOrchestrator::new(
        store_dyn.clone(),
        machine.clone(),
        storage_dyn.clone(),
        bus_dyn.clone(),
        rate_limiter,
        policies,
        clock_dyn.clone(),
        heartbeats.clone(),
        config.max_concurrent_uploads,
    );

    let reconciler = Reconciler::new(
        store_dyn,
        machine,
        storage_dyn,
        bus_dyn,
        clock_dyn,
        reconcile_config,
        heartbeats.clone(),
    );

    Harness {
        store,
        storage,
        bus,
        clock,
        heartbeats,
        orchestrator,
        reconciler,
    }
}

pub fn upload_request(user_id: &str, bytes: Vec<u8>, filename: &str) -> UploadRequest {
    UploadRequest {
        bytes: Bytes::from(bytes),
        filename: filename.to_string(),
        declared_mime_type: None,
        user_id: user_id.to_string(),
        traceparent: None,
    }
}

/// Seed a record directly in the given state, the way a crashed process
/// would have left it.
pub fn seed_record(
    harness: &Harness,
    user_id: &str,
    content: &[u8],
    state: UploadState,
    age: chrono::Duration,
) -> Wallpaper {
    let now = harness.clock.now();
    let mut wallpaper = Wallpaper::intent(
        WallpaperId::generate(),
        user_id.to_string(),
        ContentHash::of(content),
        now - age,
    );
    wallpaper.upload_state = state;
    wallpaper.state_changed_at = now - age;
    harness.store.seed(wallpaper.clone());
    wallpaper
}

/// Add the complete metadata a record holds once it reaches `stored`.
pub fn with_stored_metadata(harness: &Harness, wallpaper: &Wallpaper, extension: &str) -> Wallpaper {
    let key = format!("{}/original.{}", wallpaper.id, extension);
    let mut updated = wallpaper.clone();
    StatePatch {
        file_type: Some(wallpaperdb_core::FileType::Image),
        mime_type: Some(match extension {
            "png" => "image/png".to_string(),
            _ => "image/jpeg".to_string(),
        }),
        file_size_bytes: Some(12_345),
        width: Some(1920),
        height: Some(1080),
        aspect_ratio: Some(1.7778),
        storage_key: Some(key),
        storage_bucket: Some("wallpapers".to_string()),
        original_filename: Some("seeded.jpg".to_string()),
        ..StatePatch::default()
    }
    .apply_to(&mut updated);
    harness.store.seed(updated.clone());
    updated
}
