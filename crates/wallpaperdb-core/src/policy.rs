//! Upload validation policy.
//!
//! Per-user limits on format, size, and dimensions. Ordering matters: the
//! size check runs before any format check so an oversize payload of unknown
//! format reports `FileTooLarge`, not `InvalidFormat`.

use crate::error::AppError;
use crate::probe::ProbedContent;

/// Maximum length of a sanitized original filename.
pub const MAX_FILENAME_LEN: usize = 255;

/// Limits applied to one user's uploads.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub allowed_mime_types: Vec<String>,
    pub max_file_size_bytes: u64,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            max_file_size_bytes: 50 * 1024 * 1024,
            min_width: 16,
            min_height: 16,
            max_width: 7_680,
            max_height: 4_320,
        }
    }
}

impl ValidationPolicy {
    /// Size cap; applied before the probe so the error does not depend on
    /// whether the format is recognizable.
    pub fn check_size(&self, size: u64) -> Result<(), AppError> {
        if size > self.max_file_size_bytes {
            return Err(AppError::FileTooLarge {
                size,
                max: self.max_file_size_bytes,
            });
        }
        Ok(())
    }

    /// Format and dimension checks against the probe result.
    pub fn check_content(&self, probed: &ProbedContent) -> Result<(), AppError> {
        if !self
            .allowed_mime_types
            .iter()
            .any(|allowed| allowed == &probed.mime_type)
        {
            return Err(AppError::InvalidFormat(format!(
                "Unsupported format: {}",
                probed.mime_type
            )));
        }
        if probed.width < self.min_width
            || probed.height < self.min_height
            || probed.width > self.max_width
            || probed.height > self.max_height
        {
            return Err(AppError::DimensionsOutOfBounds {
                width: probed.width,
                height: probed.height,
            });
        }
        Ok(())
    }
}

/// Policy lookup per user. All users currently share the default policy;
/// plan-based overrides slot in here.
#[derive(Debug, Clone, Default)]
pub struct UploadPolicies {
    default: ValidationPolicy,
}

impl UploadPolicies {
    pub fn new(default: ValidationPolicy) -> Self {
        Self { default }
    }

    pub fn for_user(&self, _user_id: &str) -> &ValidationPolicy {
        &self.default
    }
}

/// Strip all characters outside `[A-Za-z0-9._-]`, then truncate to 255.
/// Idempotent: sanitizing a sanitized name is a no-op.
pub fn sanitize_filename(name: &str) -> String {
    let mut out: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    out.truncate(MAX_FILENAME_LEN);
    out
}
