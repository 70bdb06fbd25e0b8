//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while opening an encrypted file.
///
/// Reads and writes on an already opened file never fail with an error;
/// they report short byte counts instead, so that callers can treat a
/// torn tail as the end of valid data.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file exists but its header is unreadable or of an unknown format.
    #[error("bad encrypted file: {0}")]
    Failed(String),

    /// Another handle holds the advisory lock on this file.
    #[error("file is locked by another handle")]
    LockFailed,

    /// The header checksum does not match the supplied key.
    #[error("wrong encryption key")]
    WrongKey,

    /// Key material of the wrong length was supplied.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
}

impl StorageError {
    /// Creates a header failure error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true if this error is a wrong key error.
    #[must_use]
    pub fn is_wrong_key(&self) -> bool {
        matches!(self, Self::WrongKey)
    }

    /// Returns true if this error is a lock contention error.
    #[must_use]
    pub fn is_lock_failed(&self) -> bool {
        matches!(self, Self::LockFailed)
    }
}
