//! Error types for stashdb core.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, Error>;

/// Errors reported to callers of the cache store.
///
/// Value-level soft failures (a checksum mismatch on read, a torn binlog
/// record) are never reported here: a cache may lose entries, so those
/// degrade to "not found".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A file could not be opened, read or written.
    #[error("I/O error at {}", path.display())]
    Io {
        /// The offending path.
        path: PathBuf,
    },

    /// The binlog header does not match the supplied key.
    #[error("wrong key for {}", path.display())]
    WrongKey {
        /// The binlog path.
        path: PathBuf,
    },

    /// Another process or instance holds the binlog lock.
    #[error("store locked: {}", path.display())]
    LockFailed {
        /// The locked path.
        path: PathBuf,
    },

    /// The value exceeds the configured maximum size.
    #[error("value of {size} bytes exceeds limit of {limit} bytes")]
    ValueTooLarge {
        /// Size of the rejected value.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The settings are inconsistent.
    #[error("invalid settings: {message}")]
    InvalidSettings {
        /// Description of the problem.
        message: String,
    },

    /// The store is not open.
    #[error("store is closed")]
    Closed,
}

impl Error {
    /// Creates an I/O error for a path.
    pub fn io(path: impl AsRef<Path>) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates an invalid settings error.
    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: message.into(),
        }
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path } | Self::WrongKey { path } | Self::LockFailed { path } => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path() {
        let error = Error::io("/tmp/cache/0/binlog");
        assert_eq!(error.to_string(), "I/O error at /tmp/cache/0/binlog");
        assert_eq!(error.path(), Some(Path::new("/tmp/cache/0/binlog")));
    }

    #[test]
    fn wrong_key_is_not_io() {
        let wrong = Error::WrongKey {
            path: PathBuf::from("binlog"),
        };
        assert_ne!(wrong, Error::io("binlog"));
        assert!(Error::Closed.path().is_none());
    }
}
