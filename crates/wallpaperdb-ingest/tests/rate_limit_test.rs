use std::sync::Arc;

use chrono::{Duration, Utc};

use wallpaperdb_core::config::RateLimitConfig;
use wallpaperdb_core::{AppError, Clock, ManualClock};
use wallpaperdb_ingest::{InMemoryRateLimitStore, RateLimiter};

/// Scenario: three process instances share one limiter store. The window is
/// enforced across all of them, not per instance.
#[tokio::test]
async fn test_shared_store_enforces_window_across_instances() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let store = Arc::new(InMemoryRateLimitStore::new(clock_dyn.clone()));
    let config = RateLimitConfig {
        max: 10,
        window_ms: 10_000,
        redis_url: None,
    };

    let instances: Vec<RateLimiter> = (0..3)
        .map(|_| RateLimiter::new(store.clone(), clock_dyn.clone(), &config))
        .collect();

    // 10 requests spread over the instances all pass
    for i in 0..10 {
        let limiter = &instances[i % instances.len()];
        let info = limiter.check("u1").await.unwrap();
        assert_eq!(info.remaining, (9 - i) as u32);
    }

    // the 11th fails on any instance
    for limiter in &instances {
        let err = limiter.check("u1").await.unwrap_err();
        match err {
            AppError::RateLimited {
                retry_after_secs,
                reset,
                max,
            } => {
                assert!(retry_after_secs > 0);
                assert!(reset > clock.now());
                assert_eq!(max, 10);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    // a new window admits uploads again
    clock.advance(Duration::milliseconds(10_001));
    assert!(instances[0].check("u1").await.is_ok());
}

#[tokio::test]
async fn test_remaining_floors_at_zero() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let store = Arc::new(InMemoryRateLimitStore::new(clock_dyn.clone()));
    let limiter = RateLimiter::new(
        store,
        clock_dyn,
        &RateLimitConfig {
            max: 1,
            window_ms: 60_000,
            redis_url: None,
        },
    );

    assert_eq!(limiter.check("u1").await.unwrap().remaining, 0);
    for _ in 0..3 {
        assert!(limiter.check("u1").await.is_err());
    }
}
