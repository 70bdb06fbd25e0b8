//! Paired liveness tokens.
//!
//! A [`BinaryGuard`] pair links an owner and a helper running elsewhere.
//! Dropping either half marks the pair dead, which the other half observes
//! through [`BinaryGuard::alive`] without taking a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One half of a liveness pair.
#[derive(Debug)]
pub struct BinaryGuard {
    alive: Arc<AtomicBool>,
}

impl BinaryGuard {
    /// Creates a connected pair.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let alive = Arc::new(AtomicBool::new(true));
        (
            Self {
                alive: Arc::clone(&alive),
            },
            Self { alive },
        )
    }

    /// Returns true while neither half has been dropped.
    #[must_use]
    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for BinaryGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}
