//! Composition root.
//!
//! Explicit construction of the whole dependency graph at startup: pools and
//! clients first, then the orchestrator and reconciler wired on top. No
//! runtime reflection, no container; this module is the wiring.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use wallpaperdb_core::{
    Clock, Config, Lifecycle, SystemClock, UploadPolicies, ValidationPolicy,
};
use wallpaperdb_db::{PostgresWallpaperStore, StateMachine, WallpaperStore};
use wallpaperdb_events::{EventBus, NatsEventBus};
use wallpaperdb_storage::{ObjectStorage, S3Storage};

use crate::health::{HealthService, LoopHeartbeats};
use crate::orchestrator::UploadOrchestrator;
use crate::rate_limit::{
    InMemoryRateLimitStore, RateLimitStore, RateLimiter, RedisRateLimitStore,
};
use crate::reconciler::Reconciler;

pub struct App {
    pub config: Config,
    /// Handed to the HTTP intake layer, which lives outside this service.
    pub orchestrator: Arc<UploadOrchestrator>,
    pub reconciler: Arc<Reconciler>,
    pub health: Arc<HealthService>,
    components: Vec<Arc<dyn Lifecycle>>,
}

impl App {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let heartbeats = Arc::new(LoopHeartbeats::new());

        let postgres = Arc::new(
            PostgresWallpaperStore::connect(&config.database_url, config.db_max_connections)
                .await?,
        );
        postgres.init().await?;
        let store: Arc<dyn WallpaperStore> = postgres.clone();

        let s3 = Arc::new(S3Storage::new(&config.s3)?);
        let storage: Arc<dyn ObjectStorage> = s3.clone();

        let nats = Arc::new(NatsEventBus::connect(&config.nats, config.consumer.max_deliveries).await?);
        let bus: Arc<dyn EventBus> = nats.clone();

        let rate_store: Arc<dyn RateLimitStore> = match config.rate_limit.redis_url {
            Some(ref url) => {
                tracing::info!("Rate limiting over shared Redis store");
                Arc::new(RedisRateLimitStore::connect(url, clock.clone()).await?)
            }
            None => Arc::new(InMemoryRateLimitStore::new(clock.clone())),
        };
        let rate_limiter = RateLimiter::new(rate_store, clock.clone(), &config.rate_limit);

        let machine = StateMachine::new(store.clone(), clock.clone());
        let policies = UploadPolicies::new(ValidationPolicy {
            max_file_size_bytes: config.upload.max_file_size_bytes,
            ..ValidationPolicy::default()
        });

        let orchestrator = Arc::new(UploadOrchestrator::new(
            store.clone(),
            machine.clone(),
            storage.clone(),
            bus.clone(),
            rate_limiter,
            policies,
            clock.clone(),
            heartbeats.clone(),
            config.upload.max_concurrent_uploads,
        ));

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            machine,
            storage,
            bus,
            clock.clone(),
            config.reconcile.clone(),
            heartbeats.clone(),
        ));

        let components: Vec<Arc<dyn Lifecycle>> = vec![postgres, s3, nats];
        let health = Arc::new(HealthService::new(
            components.clone(),
            heartbeats,
            store,
            clock,
        ));

        Ok(Self {
            config,
            orchestrator,
            reconciler,
            health,
            components,
        })
    }

    /// Start the reconciler loops and serve until SIGINT, then drain the
    /// in-flight passes and close every backing connection.
    pub async fn run_until_shutdown(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = self.reconciler.start(shutdown_rx);

        tracing::info!(
            environment = %self.config.environment,
            bucket = %self.config.s3.bucket,
            stream = %self.config.nats.stream,
            "wallpaperdb-ingest ready"
        );

        let shutdown_signal = tokio::signal::ctrl_c();
        tokio::pin!(shutdown_signal);

        let mut report_ticker = interval(Duration::from_secs(60));
        report_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => break,
                _ = report_ticker.tick() => {
                    let report = self.health.report().await;
                    if report.ready {
                        tracing::debug!(
                            failed_wallpapers = report.failed_wallpapers,
                            terminal_failures = report.terminal_reconcile_failures,
                            "Health check passed"
                        );
                    } else {
                        tracing::warn!(
                            report = %serde_json::to_string(&report).unwrap_or_default(),
                            "Health check failed"
                        );
                    }
                }
            }
        }

        tracing::info!("Shutdown signal received, draining reconciler loops");
        let _ = shutdown_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }

        for component in &self.components {
            if let Err(e) = component.close().await {
                tracing::warn!(component = component.name(), error = %e, "Close failed");
            }
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }
}
