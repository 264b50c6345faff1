//! Per-user upload rate limiting.
//!
//! Fixed window of `window_ms` with at most `max` requests. The
//! check-and-increment must be atomic: two concurrent calls must never both
//! observe "below threshold" when their sum would exceed it. The in-memory
//! store holds each bucket under a shard lock for the whole
//! read-check-increment; the Redis store does the same in one server-side
//! script round trip.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::Serialize;
use tokio::sync::Mutex;

use wallpaperdb_core::config::RateLimitConfig;
use wallpaperdb_core::{AppError, Clock};

/// Outcome of one atomic check-and-increment.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the window after this one (floor 0).
    pub remaining: u32,
    /// Absolute expiry of the current window.
    pub reset_at: DateTime<Utc>,
}

/// Shared counter store. Counters are namespaced per key; there is no
/// global ceiling.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check_and_increment(
        &self,
        key: &str,
        max: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, AppError>;
}

struct Bucket {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Sharded in-memory store. Single-process only: instances share no state,
/// so multi-instance deployments must use the Redis store instead.
pub struct InMemoryRateLimitStore {
    shards: Vec<Mutex<HashMap<String, Bucket>>>,
    clock: Arc<dyn Clock>,
    max_buckets_per_shard: usize,
}

const SHARD_COUNT: usize = 16;
const MAX_BUCKETS_PER_SHARD: usize = 10_000;

impl InMemoryRateLimitStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            clock,
            max_buckets_per_shard: MAX_BUCKETS_PER_SHARD,
        }
    }

    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn check_and_increment(
        &self,
        key: &str,
        max: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, AppError> {
        let now = self.clock.now();
        let window = chrono::Duration::milliseconds(window.as_millis() as i64);
        let mut buckets = self.shards[self.shard_index(key)].lock().await;

        // keep the shard bounded: drop expired buckets once it grows large
        if buckets.len() >= self.max_buckets_per_shard {
            buckets.retain(|_, bucket| bucket.reset_at > now);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            reset_at: now + window,
        });

        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + window;
        }

        if bucket.count < max {
            bucket.count += 1;
            Ok(RateLimitDecision {
                allowed: true,
                remaining: max - bucket.count,
                reset_at: bucket.reset_at,
            })
        } else {
            Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: bucket.reset_at,
            })
        }
    }
}

/// Fixed-window counter in one round trip: INCR, set the expiry on the first
/// hit of the window, and report the remaining TTL.
const FIXED_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {count, ttl}
"#;

/// Redis-backed store for multi-instance deployments. The Lua script makes
/// the read-check-increment a single atomic server-side operation.
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    script: redis::Script,
    clock: Arc<dyn Clock>,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Internal(format!("Redis configuration: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Internal(format!("Redis connect: {}", e)))?;
        Ok(Self {
            conn,
            script: redis::Script::new(FIXED_WINDOW_SCRIPT),
            clock,
        })
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn check_and_increment(
        &self,
        key: &str,
        max: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, AppError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis() as i64;
        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(format!("ratelimit:{}", key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis rate limit: {}", e)))?;

        // PTTL returns a negative value if the key somehow has no expiry
        let ttl_ms = if ttl_ms > 0 { ttl_ms } else { window_ms };
        let reset_at = self.clock.now() + chrono::Duration::milliseconds(ttl_ms);

        Ok(RateLimitDecision {
            allowed: count <= max as i64,
            remaining: max.saturating_sub(count.min(u32::MAX as i64) as u32),
            reset_at,
        })
    }
}

/// Rate-limit header values returned with every accepted upload.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Limiter configured with the window and maximum, namespacing counters per
/// user id.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    max: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            max: config.max,
            window: Duration::from_millis(config.window_ms),
        }
    }

    /// Count this request, failing with `RateLimited` if the user's window
    /// is exhausted.
    pub async fn check(&self, user_id: &str) -> Result<RateLimitInfo, AppError> {
        let decision = self
            .store
            .check_and_increment(&format!("user:{}", user_id), self.max, self.window)
            .await?;

        if decision.allowed {
            Ok(RateLimitInfo {
                limit: self.max,
                remaining: decision.remaining,
                reset_at: decision.reset_at,
            })
        } else {
            let retry_after_secs = (decision.reset_at - self.clock.now())
                .num_seconds()
                .max(1) as u64;
            Err(AppError::RateLimited {
                retry_after_secs,
                reset: decision.reset_at,
                max: self.max,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallpaperdb_core::ManualClock;

    fn limiter(max: u32, window_ms: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryRateLimitStore::new(clock.clone()));
        let limiter = RateLimiter::new(
            store,
            clock.clone(),
            &RateLimitConfig {
                max,
                window_ms,
                redis_url: None,
            },
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_counts_down_then_rejects() {
        let (limiter, _clock) = limiter(3, 10_000);
        assert_eq!(limiter.check("u1").await.unwrap().remaining, 2);
        assert_eq!(limiter.check("u1").await.unwrap().remaining, 1);
        assert_eq!(limiter.check("u1").await.unwrap().remaining, 0);

        let err = limiter.check("u1").await.unwrap_err();
        match err {
            AppError::RateLimited {
                retry_after_secs,
                max,
                ..
            } => {
                assert!(retry_after_secs >= 1);
                assert_eq!(max, 3);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let (limiter, _clock) = limiter(1, 10_000);
        limiter.check("u1").await.unwrap();
        // u2 has a separate counter
        limiter.check("u2").await.unwrap();
        assert!(limiter.check("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_window_expiry_resets_counter() {
        let (limiter, clock) = limiter(1, 10_000);
        limiter.check("u1").await.unwrap();
        assert!(limiter.check("u1").await.is_err());

        clock.advance(chrono::Duration::milliseconds(10_001));
        assert!(limiter.check("u1").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_exceed_max() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryRateLimitStore::new(clock.clone()));
        let max = 10u32;

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .check_and_increment("user:u1", max, Duration::from_secs(10))
                    .await
                    .map(|d| d.allowed)
            }));
        }

        let mut allowed = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, max);
    }
}
