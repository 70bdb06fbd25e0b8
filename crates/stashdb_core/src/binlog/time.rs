//! Estimated time points.
//!
//! Access times are kept on a logical clock that only moves forward. Each
//! step is derived from the wall-clock delta since the last step and is
//! capped, so that clock changes cannot reorder or mass-expire entries.

/// Largest advancement of the logical clock in one step, in seconds.
pub const MAX_TIME_ADVANCEMENT: u64 = 365 * 24 * 60 * 60;

/// A point on the logical clock together with the wall clock it was taken at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EstimatedTimePoint {
    /// Logical seconds since the store was created.
    pub relative: u64,
    /// Unix time in seconds when this point was taken.
    pub system: u32,
}

impl EstimatedTimePoint {
    /// Size of an encoded time point in bytes.
    pub const SIZE: usize = 8;

    /// Creates a time point.
    #[must_use]
    pub const fn new(relative: u64, system: u32) -> Self {
        Self { relative, system }
    }

    /// Returns the point reached at wall-clock time `now`.
    ///
    /// A clock that went backwards does not move the logical clock.
    #[must_use]
    pub fn advanced(self, now: u32) -> Self {
        let now = now.max(1);
        let delta = u64::from(now.saturating_sub(self.system)).min(MAX_TIME_ADVANCEMENT);
        Self {
            relative: self.relative + delta,
            system: now,
        }
    }

    /// Encodes as `relative (u32 LE) | system (u32 LE)`.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let relative = u32::try_from(self.relative).unwrap_or(u32::MAX);
        let mut bytes = [0u8; Self::SIZE];
        bytes[..4].copy_from_slice(&relative.to_le_bytes());
        bytes[4..].copy_from_slice(&self.system.to_le_bytes());
        bytes
    }

    /// Decodes a time point written by [`to_bytes`](Self::to_bytes).
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let relative = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let system = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self {
            relative: u64::from(relative),
            system,
        }
    }
}

/// Source of the current unix time in seconds.
pub type Clock = std::sync::Arc<dyn Fn() -> u32 + Send + Sync>;

/// Returns a [`Clock`] reading the system time.
#[must_use]
pub fn system_clock() -> Clock {
    std::sync::Arc::new(unixtime)
}

/// Current unix time in seconds.
#[must_use]
pub fn unixtime() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}
