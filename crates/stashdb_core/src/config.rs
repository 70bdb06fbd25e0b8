//! Store configuration.

use crate::binlog::{BUNDLED_RECORDS_LIMIT, DATA_SIZE_LIMIT};
use crate::error::{CacheResult, Error};
use std::time::Duration;

/// Configuration for a cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Maximum number of parts in one bundled binlog record.
    pub max_bundled_records: usize,

    /// Size of the block read from the binlog at a time during replay.
    pub read_block_size: usize,

    /// Maximum size of a single cached value.
    pub max_data_size: usize,

    /// How long pending remove/access bundles may wait before being written.
    pub write_bundle_delay: Duration,

    /// How many stale entries are removed per queue turn.
    pub stale_remove_chunk: usize,

    /// Obsolete binlog bytes that trigger compaction (0 = never compact).
    pub compact_after_excess: u64,

    /// When non-zero, compaction additionally requires
    /// `excess * compact_after_full_size >= compact_after_excess * binlog_size`.
    pub compact_after_full_size: u64,

    /// Number of entries per bundle written by the compactor.
    pub compact_chunk_size: usize,

    /// Whether access times are tracked and written to the binlog.
    pub track_estimated_time: bool,

    /// Total size of cached values to keep (0 = unlimited).
    pub total_size_limit: u64,

    /// Maximum age in seconds of an unused entry (0 = unlimited).
    pub total_time_limit: u64,

    /// Delay before a pending prune runs.
    pub prune_timeout: Duration,

    /// Upper bound on the delay before the next prune check.
    pub max_prune_check_timeout: Duration,

    /// Whether a wrong key silently starts a fresh store.
    pub clear_on_wrong_key: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_bundled_records: 16 * 1024,
            read_block_size: 8 * 1024 * 1024, // 8 MB
            max_data_size: DATA_SIZE_LIMIT - 1,
            write_bundle_delay: Duration::from_secs(15 * 60),
            stale_remove_chunk: 256,
            compact_after_excess: 8 * 1024 * 1024,
            compact_after_full_size: 0,
            compact_chunk_size: 16 * 1024,
            track_estimated_time: true,
            total_size_limit: 1024 * 1024 * 1024, // 1 GB
            total_time_limit: 31 * 24 * 60 * 60,  // one month
            prune_timeout: Duration::from_secs(5),
            max_prune_check_timeout: Duration::from_secs(3600),
            clear_on_wrong_key: false,
        }
    }
}

impl Settings {
    /// Creates settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum bundle size.
    #[must_use]
    pub const fn max_bundled_records(mut self, value: usize) -> Self {
        self.max_bundled_records = value;
        self
    }

    /// Sets the replay read block size.
    #[must_use]
    pub const fn read_block_size(mut self, value: usize) -> Self {
        self.read_block_size = value;
        self
    }

    /// Sets the maximum value size.
    #[must_use]
    pub const fn max_data_size(mut self, value: usize) -> Self {
        self.max_data_size = value;
        self
    }

    /// Sets the bundle write delay.
    #[must_use]
    pub const fn write_bundle_delay(mut self, value: Duration) -> Self {
        self.write_bundle_delay = value;
        self
    }

    /// Sets the stale removal chunk.
    #[must_use]
    pub const fn stale_remove_chunk(mut self, value: usize) -> Self {
        self.stale_remove_chunk = value;
        self
    }

    /// Sets the compaction excess threshold.
    #[must_use]
    pub const fn compact_after_excess(mut self, value: u64) -> Self {
        self.compact_after_excess = value;
        self
    }

    /// Sets the compaction full size ratio.
    #[must_use]
    pub const fn compact_after_full_size(mut self, value: u64) -> Self {
        self.compact_after_full_size = value;
        self
    }

    /// Sets the compactor bundle size.
    #[must_use]
    pub const fn compact_chunk_size(mut self, value: usize) -> Self {
        self.compact_chunk_size = value;
        self
    }

    /// Sets whether access times are tracked.
    #[must_use]
    pub const fn track_estimated_time(mut self, value: bool) -> Self {
        self.track_estimated_time = value;
        self
    }

    /// Sets the total size limit.
    #[must_use]
    pub const fn total_size_limit(mut self, value: u64) -> Self {
        self.total_size_limit = value;
        self
    }

    /// Sets the total time limit in seconds.
    #[must_use]
    pub const fn total_time_limit(mut self, value: u64) -> Self {
        self.total_time_limit = value;
        self
    }

    /// Sets the prune delay.
    #[must_use]
    pub const fn prune_timeout(mut self, value: Duration) -> Self {
        self.prune_timeout = value;
        self
    }

    /// Sets the maximum prune check delay.
    #[must_use]
    pub const fn max_prune_check_timeout(mut self, value: Duration) -> Self {
        self.max_prune_check_timeout = value;
        self
    }

    /// Sets whether a wrong key starts a fresh store.
    #[must_use]
    pub const fn clear_on_wrong_key(mut self, value: bool) -> Self {
        self.clear_on_wrong_key = value;
        self
    }

    /// Applies a runtime update if the merged settings stay valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`] and leaves `self` untouched if the
    /// update would break a [`validate`](Self::validate) rule.
    pub fn apply(&mut self, update: &SettingsUpdate) -> CacheResult<()> {
        let mut merged = self.clone();
        merged.total_size_limit = update.total_size_limit;
        merged.total_time_limit = update.total_time_limit;
        merged.validate()?;
        *self = merged;
        Ok(())
    }

    /// Checks that the settings are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`] describing the first problem found.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_bundled_records == 0 || self.max_bundled_records >= BUNDLED_RECORDS_LIMIT {
            return Err(Error::invalid_settings(format!(
                "max_bundled_records must be in 1..{BUNDLED_RECORDS_LIMIT}"
            )));
        }
        if self.max_data_size == 0 || self.max_data_size >= DATA_SIZE_LIMIT {
            return Err(Error::invalid_settings(format!(
                "max_data_size must be in 1..{DATA_SIZE_LIMIT}"
            )));
        }
        if self.read_block_size < 64 || self.read_block_size % 16 != 0 {
            return Err(Error::invalid_settings(
                "read_block_size must be a multiple of 16 and at least 64",
            ));
        }
        if self.stale_remove_chunk == 0 {
            return Err(Error::invalid_settings("stale_remove_chunk must be positive"));
        }
        if self.compact_chunk_size == 0 || self.compact_chunk_size > self.max_bundled_records {
            return Err(Error::invalid_settings(
                "compact_chunk_size must be in 1..=max_bundled_records",
            ));
        }
        if self.total_size_limit != 0 && self.total_size_limit <= self.max_data_size as u64 {
            return Err(Error::invalid_settings(
                "total_size_limit must exceed max_data_size",
            ));
        }
        Ok(())
    }
}

/// Settings that may change while a store is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsUpdate {
    /// New total size limit (0 = unlimited).
    pub total_size_limit: u64,
    /// New total time limit in seconds (0 = unlimited).
    pub total_time_limit: u64,
}

impl Default for SettingsUpdate {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            total_size_limit: settings.total_size_limit,
            total_time_limit: settings.total_time_limit,
        }
    }
}
