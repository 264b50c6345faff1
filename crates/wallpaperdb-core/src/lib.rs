//! WallpaperDB Core Library
//!
//! This crate provides the domain model, error types, configuration, and
//! validation shared across all WallpaperDB components: the wallpaper record
//! with its six-state upload lifecycle, the content probe, the per-user
//! validation policy, and the wire types for the `wallpaper.uploaded` event.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod hash;
pub mod lifecycle;
pub mod models;
pub mod policy;
pub mod probe;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use hash::ContentHash;
pub use lifecycle::Lifecycle;
pub use models::{FileType, StatePatch, UploadState, Wallpaper, WallpaperId};
pub use policy::{sanitize_filename, UploadPolicies, ValidationPolicy};
pub use probe::{probe, ProbedContent};
