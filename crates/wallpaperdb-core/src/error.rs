//! Error types module
//!
//! All errors in the ingestion pipeline are unified under the [`AppError`]
//! enum. The [`ErrorMetadata`] trait lets each error self-describe how the
//! HTTP intake layer (out of scope here) should present it as a
//! problem-detail response.

use chrono::{DateTime, Utc};
use sqlx::Error as SqlxError;

use crate::models::UploadState;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like rate limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "RATE_LIMITED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("No file was provided")]
    MissingFile,

    #[error("No user id was provided")]
    MissingUserId,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("File too large: {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Dimensions out of bounds: {width}x{height}")]
    DimensionsOutOfBounds { width: u32, height: u32 },

    #[error("Rate limit exceeded: {max} requests per window")]
    RateLimited {
        retry_after_secs: u64,
        reset: DateTime<Utc>,
        max: u32,
    },

    #[error("Too many concurrent uploads in flight")]
    Overloaded,

    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: UploadState, to: UploadState },

    #[error("Concurrent transition lost for wallpaper {id}")]
    ConcurrentTransition { id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl AppError {
    /// Get the error type name for log fields and detailed responses.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::MissingFile => "MissingFile",
            AppError::MissingUserId => "MissingUserId",
            AppError::InvalidFormat(_) => "InvalidFormat",
            AppError::FileTooLarge { .. } => "FileTooLarge",
            AppError::DimensionsOutOfBounds { .. } => "DimensionsOutOfBounds",
            AppError::RateLimited { .. } => "RateLimited",
            AppError::Overloaded => "Overloaded",
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::Bus(_) => "Bus",
            AppError::InvalidStateTransition { .. } => "InvalidStateTransition",
            AppError::ConcurrentTransition { .. } => "ConcurrentTransition",
            AppError::NotFound(_) => "NotFound",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Internal(_) => "Internal",
        }
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        match self {
            AppError::MissingFile => 400,
            AppError::MissingUserId => 400,
            AppError::InvalidFormat(_) => 400,
            AppError::FileTooLarge { .. } => 413,
            AppError::DimensionsOutOfBounds { .. } => 400,
            AppError::RateLimited { .. } => 429,
            AppError::Overloaded => 503,
            AppError::Database(_) => 500,
            AppError::Storage(_) => 500,
            AppError::Bus(_) => 500,
            AppError::InvalidStateTransition { .. } => 500,
            AppError::ConcurrentTransition { .. } => 500,
            AppError::NotFound(_) => 404,
            AppError::InvalidInput(_) => 400,
            AppError::Internal(_) => 500,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::MissingFile => "MISSING_FILE",
            AppError::MissingUserId => "MISSING_USER_ID",
            AppError::InvalidFormat(_) => "INVALID_FORMAT",
            AppError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            AppError::DimensionsOutOfBounds { .. } => "DIMENSIONS_OUT_OF_BOUNDS",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Overloaded => "OVERLOADED",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Bus(_) => "EVENT_BUS_ERROR",
            AppError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            AppError::ConcurrentTransition { .. } => "CONCURRENT_TRANSITION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            AppError::MissingFile => false,
            AppError::MissingUserId => false,
            AppError::InvalidFormat(_) => false,
            AppError::FileTooLarge { .. } => false,
            AppError::DimensionsOutOfBounds { .. } => false,
            AppError::RateLimited { .. } => true,
            AppError::Overloaded => true,
            AppError::Database(_) => true,
            AppError::Storage(_) => true,
            AppError::Bus(_) => true,
            AppError::InvalidStateTransition { .. } => false,
            AppError::ConcurrentTransition { .. } => true,
            AppError::NotFound(_) => false,
            AppError::InvalidInput(_) => false,
            AppError::Internal(_) => true,
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::Bus(_) => "Failed to announce upload".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InvalidStateTransition { .. } | AppError::ConcurrentTransition { .. } => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            AppError::MissingFile
            | AppError::MissingUserId
            | AppError::InvalidFormat(_)
            | AppError::FileTooLarge { .. }
            | AppError::DimensionsOutOfBounds { .. }
            | AppError::NotFound(_)
            | AppError::InvalidInput(_) => LogLevel::Debug,
            AppError::RateLimited { .. }
            | AppError::Overloaded
            | AppError::ConcurrentTransition { .. } => LogLevel::Warn,
            AppError::Database(_)
            | AppError::Storage(_)
            | AppError::Bus(_)
            | AppError::InvalidStateTransition { .. }
            | AppError::Internal(_) => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_rate_limited() {
        let err = AppError::RateLimited {
            retry_after_secs: 7,
            reset: Utc::now(),
            max: 10,
        };
        assert_eq!(err.http_status_code(), 429);
        assert_eq!(err.error_code(), "RATE_LIMITED");
        assert!(err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_error_metadata_file_too_large() {
        let err = AppError::FileTooLarge {
            size: 20_000_000,
            max: 10_000_000,
        };
        assert_eq!(err.http_status_code(), 413);
        assert_eq!(err.error_code(), "FILE_TOO_LARGE");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("20000000"));
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_database() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_invalid_transition_is_not_recoverable() {
        let err = AppError::InvalidStateTransition {
            from: UploadState::Completed,
            to: UploadState::Uploading,
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.client_message(), "Internal server error");
    }
}
