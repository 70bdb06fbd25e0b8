//! Bundled remove and access records.
//!
//! Removes and reads are collected in memory and written as one
//! `MultiRemove` / `MultiAccess` record when a bundle fills up or the
//! bundle timer fires.

use super::timers::arm;
use super::DatabaseObject;
use crate::binlog::BinlogRecord;
use crate::types::Key;

impl DatabaseObject {
    /// Notes a read of `key`, advancing its use time.
    pub(super) fn record_entry_access(&mut self, key: Key) {
        if !self.settings.track_estimated_time {
            return;
        }
        let point = self.count_time_point();
        self.apply_time_point(point);
        if let Some(mut entry) = self.map.get(&key).copied() {
            entry.use_time = self.time.relative;
            self.set_map_entry(key, entry);
        }
        self.accessed.insert(key);
        if self.accessed.len() >= self.settings.max_bundled_records {
            self.write_multi_access();
        } else {
            self.schedule_bundles();
        }
    }

    /// Queues `key` for the next `MultiRemove` record.
    pub(super) fn schedule_remove(&mut self, key: Key) {
        self.accessed.remove(&key);
        self.removing.insert(key);
        if self.removing.len() >= self.settings.max_bundled_records {
            self.write_multi_remove();
        } else {
            self.schedule_bundles();
        }
    }

    fn schedule_bundles(&mut self) {
        arm(&mut self.timers.write_bundles, self.settings.write_bundle_delay);
    }

    /// Writes every pending bundle.
    pub(super) fn write_bundles(&mut self) {
        self.timers.write_bundles = None;
        self.write_multi_remove();
        self.write_multi_access();
    }

    pub(super) fn write_multi_remove(&mut self) {
        if self.removing.is_empty() {
            return;
        }
        let keys: Vec<Key> = std::mem::take(&mut self.removing).into_iter().collect();
        let record = BinlogRecord::MultiRemove(keys);
        if self.append_record(&record) {
            self.binlog_excess += record.encoded_size(self.format) as u64;
        }
    }

    fn write_multi_access(&mut self) {
        if self.accessed.is_empty() {
            return;
        }
        let keys: Vec<Key> = std::mem::take(&mut self.accessed).into_iter().collect();
        let time = self.count_time_point();
        self.apply_time_point(time);
        let record = BinlogRecord::MultiAccess { time, keys };
        if self.append_record(&record) {
            self.binlog_excess += record.encoded_size(self.format) as u64;
        }
    }
}
