//! Size and time based eviction.
//!
//! Pruning selects victims first and removes them afterwards. Small victim
//! sets are removed at once; larger ones go to the stale set and are
//! removed `stale_remove_chunk` keys per queue turn.

use super::timers::arm;
use super::DatabaseObject;
use crate::types::Key;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

impl DatabaseObject {
    /// Arms the prune timer. Returns true if a prune is due, false if only
    /// a later re-check was scheduled.
    pub(super) fn start_delayed_pruning(&mut self) -> bool {
        if !self.settings.track_estimated_time || self.map.is_empty() {
            return false;
        }
        if self.over_size_limit() || self.time_stale_possible() {
            arm(&mut self.timers.prune, self.settings.prune_timeout);
            return true;
        }
        let limit = self.settings.total_time_limit;
        if limit > 0 && self.minimal_entry_time != 0 {
            let now = self.count_time_point().relative;
            let seconds = (self.minimal_entry_time + limit).saturating_sub(now);
            let delay = Duration::from_secs(seconds).min(self.settings.max_prune_check_timeout);
            arm(&mut self.timers.prune, delay);
        }
        false
    }

    fn over_size_limit(&self) -> bool {
        let limit = self.settings.total_size_limit;
        limit > 0 && self.total_size > limit
    }

    /// Entries used at or before this logical time are too old.
    fn stale_time_cutoff(&self) -> Option<u64> {
        let limit = self.settings.total_time_limit;
        if limit == 0 {
            return None;
        }
        self.count_time_point().relative.checked_sub(limit)
    }

    fn time_stale_possible(&self) -> bool {
        self.stale_time_cutoff().is_some_and(|before| {
            self.minimal_entry_time == 0 || self.minimal_entry_time <= before
        })
    }

    /// Selects and removes entries over the time and size limits.
    pub(super) fn prune(&mut self) {
        if !self.stale.is_empty() || !self.is_open() {
            return;
        }
        let mut stale = BTreeSet::new();
        let mut stale_size = 0u64;
        self.collect_time_stale(&mut stale, &mut stale_size);
        self.collect_size_stale(&mut stale, &mut stale_size);
        if stale.is_empty() {
            self.start_delayed_pruning();
            return;
        }
        tracing::debug!(count = stale.len(), bytes = stale_size, "pruning");
        if stale.len() <= self.settings.stale_remove_chunk {
            self.clear_stale_now(stale);
        } else {
            self.stale = stale;
            self.start_stale_clear();
        }
    }

    /// Collects entries used at or before the cutoff. The scan also
    /// recomputes the minimal use time of the survivors.
    fn collect_time_stale(&mut self, stale: &mut BTreeSet<Key>, stale_size: &mut u64) {
        let Some(before) = self.stale_time_cutoff() else {
            return;
        };
        if self.minimal_entry_time > before {
            return;
        }
        let mut minimal = 0u64;
        let mut count = 0usize;
        for (key, entry) in &self.map {
            if entry.use_time <= before {
                stale.insert(*key);
                *stale_size += u64::from(entry.size);
            } else if minimal == 0 || entry.use_time < minimal {
                minimal = entry.use_time;
                count = 1;
            } else if entry.use_time == minimal {
                count += 1;
            }
        }
        self.minimal_entry_time = minimal;
        self.entries_with_minimal_time = count;
    }

    /// Collects the oldest entries whose removal brings the total under the
    /// size limit, keeping only a bounded candidate set during the scan.
    fn collect_size_stale(&self, stale: &mut BTreeSet<Key>, stale_size: &mut u64) {
        let limit = self.settings.total_size_limit;
        let remaining = self.total_size.saturating_sub(*stale_size);
        if limit == 0 || remaining <= limit {
            return;
        }
        let remove_size = remaining - limit;

        let mut oldest: BTreeMap<(u64, Key), u32> = BTreeMap::new();
        let mut oldest_size = 0u64;
        for (key, entry) in &self.map {
            if stale.contains(key) {
                continue;
            }
            if oldest_size >= remove_size {
                let newest = oldest.last_key_value().map(|(&(time, _), _)| time);
                if newest.is_some_and(|newest| entry.use_time >= newest) {
                    continue;
                }
            }
            oldest.insert((entry.use_time, *key), entry.size);
            oldest_size += u64::from(entry.size);
            while let Some((_, &size)) = oldest.last_key_value() {
                if oldest_size - u64::from(size) < remove_size {
                    break;
                }
                oldest.pop_last();
                oldest_size -= u64::from(size);
            }
        }
        stale.extend(oldest.into_keys().map(|(_, key)| key));
        *stale_size += oldest_size;
    }

    fn clear_stale_now(&mut self, stale: BTreeSet<Key>) {
        for key in stale {
            let _ = self.remove(key);
        }
        self.start_delayed_pruning();
    }

    pub(super) fn start_stale_clear(&mut self) {
        self.schedule_stats();
        self.clear_stale_chunk();
    }

    /// Removes up to `stale_remove_chunk` stale keys and schedules the rest
    /// for the next queue turn.
    pub(super) fn clear_stale_chunk(&mut self) {
        self.timers.stale = None;
        if self.stale.is_empty() {
            return;
        }
        for _ in 0..self.settings.stale_remove_chunk {
            let Some(key) = self.stale.pop_first() else {
                break;
            };
            let _ = self.remove(key);
        }
        if self.stale.is_empty() {
            self.start_delayed_pruning();
            self.schedule_stats();
            self.run_cleaner_waiters();
        } else {
            self.timers.stale = Some(Instant::now());
        }
    }
}
