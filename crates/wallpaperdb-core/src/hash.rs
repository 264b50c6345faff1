//! Content hashing.
//!
//! SHA-256 over the raw file bytes is the per-user deduplication key and the
//! basis of content addressing.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Lowercase hex SHA-256 of the file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a complete in-memory payload.
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Parse an already-computed hash, validating it is 64 hex chars.
    pub fn from_hex(s: &str) -> Result<Self, AppError> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::InvalidInput(format!(
                "Invalid content hash: {}",
                s
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental hasher for payloads that arrive in chunks.
#[derive(Default)]
pub struct StreamingHasher {
    inner: Sha256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(self) -> ContentHash {
        ContentHash(hex::encode(self.inner.finalize()))
    }
}
