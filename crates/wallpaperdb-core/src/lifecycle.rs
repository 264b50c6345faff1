//! Uniform lifecycle interface for backing-system connections.
//!
//! Each port implementation (metadata store, object storage, event bus)
//! implements this; the composition root initializes them at startup,
//! iterates them for readiness checks, and closes them on shutdown.

use async_trait::async_trait;

use crate::error::AppError;

#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Component name used in health reports and logs.
    fn name(&self) -> &'static str;

    /// One-time startup work (migrations, stream creation). Defaults to a
    /// no-op for components constructed ready.
    async fn init(&self) -> Result<(), AppError> {
        Ok(())
    }

    /// Cheap liveness probe against the backing system.
    async fn health(&self) -> Result<(), AppError>;

    /// Release connections. Defaults to a no-op.
    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}
