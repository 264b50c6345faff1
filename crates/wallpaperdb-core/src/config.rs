//! Configuration module
//!
//! Environment-driven configuration for the ingestion service: database,
//! object storage, event stream, rate limiting, and reconciler cadences.

use std::env;

// Default tunables
const DB_MAX_CONNECTIONS: u32 = 20;
const RATE_LIMIT_MAX: u32 = 60;
const RATE_LIMIT_WINDOW_MS: u64 = 60_000;
const RECONCILE_STUCK_UPLOAD_AGE_MS: u64 = 10 * 60 * 1000;
const RECONCILE_MISSING_EVENT_AGE_MS: u64 = 5 * 60 * 1000;
const RECONCILE_ORPHAN_INTENT_AGE_MS: u64 = 60 * 60 * 1000;
const RECONCILE_STUCK_UPLOAD_INTERVAL_MS: u64 = 1_000;
const RECONCILE_MISSING_EVENT_INTERVAL_MS: u64 = 1_000;
const RECONCILE_ORPHAN_SWEEP_INTERVAL_MS: u64 = 2_000;
const RECONCILE_MAX_ATTEMPTS: i32 = 5;
const MAX_CONCURRENT_UPLOADS: usize = 16;
const MAX_FILE_SIZE_MB: u64 = 50;
const CONSUMER_MAX_DELIVERIES: u32 = 5;

/// Application configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub s3: S3Config,
    pub nats: NatsConfig,
    pub rate_limit: RateLimitConfig,
    pub upload: UploadConfig,
    pub reconcile: ReconcileConfig,
    pub consumer: ConsumerConfig,
}

#[derive(Clone, Debug)]
pub struct S3Config {
    /// Custom endpoint for S3-compatible providers (MinIO etc.); standard
    /// AWS endpoints when unset.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: String,
    pub region: String,
}

#[derive(Clone, Debug)]
pub struct NatsConfig {
    pub url: String,
    pub stream: String,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max: u32,
    pub window_ms: u64,
    /// When set, the limiter uses the shared Redis store so the window is
    /// enforced across process instances.
    pub redis_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub max_file_size_bytes: u64,
    pub max_concurrent_uploads: usize,
}

#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    pub stuck_upload_age_ms: u64,
    pub missing_event_age_ms: u64,
    pub orphan_intent_age_ms: u64,
    pub stuck_upload_interval_ms: u64,
    pub missing_event_interval_ms: u64,
    pub orphan_sweep_interval_ms: u64,
    /// Reconciliation touches per record before it is surrendered as failed.
    pub max_attempts: i32,
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub max_deliveries: u32,
    pub dead_letter_subject: String,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let environment = env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let s3 = S3Config {
            endpoint: env::var("S3_ENDPOINT").ok(),
            access_key_id: env::var("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: env::var("S3_SECRET_ACCESS_KEY").ok(),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "wallpapers".to_string()),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        };

        let nats = NatsConfig {
            url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            stream: env::var("NATS_STREAM").unwrap_or_else(|_| "WALLPAPER".to_string()),
        };

        let rate_limit = RateLimitConfig {
            max: env_u32("RATE_LIMIT_MAX", RATE_LIMIT_MAX),
            window_ms: env_u64("RATE_LIMIT_WINDOW_MS", RATE_LIMIT_WINDOW_MS),
            redis_url: env::var("RATE_LIMIT_REDIS_URL").ok(),
        };

        let upload = UploadConfig {
            max_file_size_bytes: env_u64("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB) * 1024 * 1024,
            max_concurrent_uploads: env_u64(
                "MAX_CONCURRENT_UPLOADS",
                MAX_CONCURRENT_UPLOADS as u64,
            ) as usize,
        };

        let reconcile = ReconcileConfig {
            stuck_upload_age_ms: env_u64(
                "RECONCILE_STUCK_UPLOAD_AGE_MS",
                RECONCILE_STUCK_UPLOAD_AGE_MS,
            ),
            missing_event_age_ms: env_u64(
                "RECONCILE_MISSING_EVENT_AGE_MS",
                RECONCILE_MISSING_EVENT_AGE_MS,
            ),
            orphan_intent_age_ms: env_u64(
                "RECONCILE_ORPHAN_INTENT_AGE_MS",
                RECONCILE_ORPHAN_INTENT_AGE_MS,
            ),
            stuck_upload_interval_ms: env_u64(
                "RECONCILE_STUCK_UPLOAD_INTERVAL_MS",
                RECONCILE_STUCK_UPLOAD_INTERVAL_MS,
            ),
            missing_event_interval_ms: env_u64(
                "RECONCILE_MISSING_EVENT_INTERVAL_MS",
                RECONCILE_MISSING_EVENT_INTERVAL_MS,
            ),
            orphan_sweep_interval_ms: env_u64(
                "RECONCILE_ORPHAN_SWEEP_INTERVAL_MS",
                RECONCILE_ORPHAN_SWEEP_INTERVAL_MS,
            ),
            max_attempts: env_u32("RECONCILE_MAX_ATTEMPTS", RECONCILE_MAX_ATTEMPTS as u32) as i32,
        };

        let consumer = ConsumerConfig {
            max_deliveries: env_u32("CONSUMER_MAX_DELIVERIES", CONSUMER_MAX_DELIVERIES),
            dead_letter_subject: env::var("CONSUMER_DEAD_LETTER_SUBJECT")
                .unwrap_or_else(|_| "wallpaper.dlq".to_string()),
        };

        Ok(Config {
            environment,
            database_url,
            db_max_connections: env_u32("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            s3,
            nats,
            rate_limit,
            upload,
            reconcile,
            consumer,
        })
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.rate_limit.max == 0 {
            return Err(anyhow::anyhow!("RATE_LIMIT_MAX must be at least 1"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(anyhow::anyhow!("RATE_LIMIT_WINDOW_MS must be at least 1"));
        }
        if self.upload.max_concurrent_uploads == 0 {
            return Err(anyhow::anyhow!("MAX_CONCURRENT_UPLOADS must be at least 1"));
        }
        if self.reconcile.max_attempts < 1 {
            return Err(anyhow::anyhow!("RECONCILE_MAX_ATTEMPTS must be at least 1"));
        }
        if self.s3.bucket.is_empty() {
            return Err(anyhow::anyhow!("S3_BUCKET must not be empty"));
        }
        if self.is_production() && self.s3.access_key_id.is_none() {
            return Err(anyhow::anyhow!(
                "S3_ACCESS_KEY_ID must be set in production"
            ));
        }
        Ok(())
    }
}
