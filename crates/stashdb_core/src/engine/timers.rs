//! Deadlines driven by the worker loop.

use super::DatabaseObject;
use crate::stats::STATS_UPDATE_INTERVAL;
use std::time::{Duration, Instant};

/// One-shot deadlines of the engine. `None` means disarmed.
#[derive(Debug, Default)]
pub(super) struct Timers {
    pub write_bundles: Option<Instant>,
    pub stale: Option<Instant>,
    pub prune: Option<Instant>,
    pub stats: Option<Instant>,
}

impl Timers {
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.write_bundles, self.stale, self.prune, self.stats]
            .into_iter()
            .flatten()
            .min()
    }
}

/// Arms `slot` to fire after `delay`, unless it already fires sooner.
pub(super) fn arm(slot: &mut Option<Instant>, delay: Duration) {
    let at = Instant::now() + delay;
    if slot.map_or(true, |current| current > at) {
        *slot = Some(at);
    }
}

fn take_due(slot: &mut Option<Instant>, now: Instant) -> bool {
    match *slot {
        Some(at) if at <= now => {
            *slot = None;
            true
        }
        _ => false,
    }
}

impl DatabaseObject {
    /// Runs every timer due at `now`.
    pub fn fire_timers(&mut self, now: Instant) {
        if take_due(&mut self.timers.write_bundles, now) {
            self.write_bundles();
            self.check_compactor();
        }
        if take_due(&mut self.timers.stale, now) {
            self.clear_stale_chunk();
        }
        if take_due(&mut self.timers.prune, now) {
            self.prune();
        }
        if take_due(&mut self.timers.stats, now) {
            self.push_stats();
        }
    }

    /// Pushes fresh statistics to subscribers soon.
    pub(super) fn schedule_stats(&mut self) {
        if self.stats.has_subscribers() && self.timers.stats.is_none() {
            arm(&mut self.timers.stats, STATS_UPDATE_INTERVAL);
        }
    }

    pub(super) fn push_stats(&mut self) {
        if self.stats.has_subscribers() {
            let current = self.current_stats();
            self.stats.push(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_keeps_the_earlier_deadline() {
        let mut slot = None;
        arm(&mut slot, Duration::from_secs(10));
        let first = slot.unwrap();
        arm(&mut slot, Duration::from_secs(60));
        assert_eq!(slot, Some(first));
        arm(&mut slot, Duration::ZERO);
        assert!(slot.unwrap() < first);
    }

    #[test]
    fn next_deadline_is_minimum() {
        let now = Instant::now();
        let timers = Timers {
            write_bundles: Some(now + Duration::from_secs(5)),
            prune: Some(now + Duration::from_secs(1)),
            ..Timers::default()
        };
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(Timers::default().next_deadline(), None);
    }

    #[test]
    fn due_timers_are_disarmed() {
        let now = Instant::now();
        let mut slot = Some(now);
        assert!(take_due(&mut slot, now));
        assert!(slot.is_none());

        let mut later = Some(now + Duration::from_secs(1));
        assert!(!take_due(&mut later, now));
        assert!(later.is_some());
    }
}
