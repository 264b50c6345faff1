//! WallpaperDB ingestion service.
//!
//! The write path (upload orchestrator), the repair path (reconciler), the
//! per-user rate limiter, and the health surface, wired together by the
//! composition root in [`app`].

pub mod app;
pub mod health;
pub mod orchestrator;
pub mod rate_limit;
pub mod reconciler;

pub use app::App;
pub use health::{HealthReport, HealthService, LoopHeartbeats};
pub use orchestrator::{UploadOrchestrator, UploadRequest, UploadResponse, UploadStatus};
pub use rate_limit::{
    InMemoryRateLimitStore, RateLimitDecision, RateLimitInfo, RateLimitStore, RateLimiter,
    RedisRateLimitStore,
};
pub use reconciler::Reconciler;
