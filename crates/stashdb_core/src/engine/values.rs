//! Value operations: put, get, remove and their conditional variants.

use super::{DatabaseObject, Entry};
use crate::binlog::{BinlogRecord, EstimatedTimePoint, StoreRecord};
use crate::error::{CacheResult, Error};
use crate::types::{Key, PlaceId, TaggedValue};
use stashdb_storage::{EncryptedFile, Mode, StorageError};
use std::fs;
use std::io;
use std::path::Path;

impl DatabaseObject {
    /// Stores `value` under `key`. Empty bytes remove the key.
    ///
    /// Storing the same bytes and tag again only refreshes the access time.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the store is not open
    /// - [`Error::ValueTooLarge`] if the value exceeds `max_data_size`
    /// - [`Error::Io`] if the binlog or the value file cannot be written
    pub fn put(&mut self, key: Key, value: TaggedValue) -> CacheResult<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        if value.bytes.is_empty() {
            return self.remove(key);
        }
        let limit = self.settings.max_data_size;
        let size = u32::try_from(value.bytes.len())
            .ok()
            .filter(|_| value.bytes.len() <= limit)
            .ok_or(Error::ValueTooLarge {
                size: value.bytes.len(),
                limit,
            })?;

        self.removing.remove(&key);
        self.stale.remove(&key);
        let checksum = crc32fast::hash(&value.bytes);

        let existing = self.map.get(&key).copied();
        let place = match existing {
            Some(already) => {
                if already.tag == value.tag
                    && already.size == size
                    && already.checksum == checksum
                    && self.read_value_data(&already.place, already.size).as_deref()
                        == Some(value.bytes.as_slice())
                {
                    self.record_entry_access(key);
                    return Ok(());
                }
                if self.places.get(&already.place).copied().unwrap_or(0) > 1 {
                    self.fresh_place()
                } else {
                    already.place
                }
            }
            None => self.fresh_place(),
        };

        let time = self.next_record_time();
        let record = StoreRecord {
            key,
            tag: value.tag,
            size,
            place,
            checksum,
            time,
        };
        if !self.append_record(&BinlogRecord::Store(record)) {
            return Err(Error::io(self.binlog_path()));
        }
        if existing.is_some() {
            self.binlog_excess += self.format.store_size() as u64;
        }
        self.set_map_entry(
            key,
            Entry {
                place,
                tag: value.tag,
                checksum,
                size,
                use_time: time.relative,
            },
        );

        let path = self.place_path(&place);
        if let Err(error) = self.write_value_data(&path, &value.bytes) {
            let _ = self.remove(key);
            return Err(error);
        }
        self.optimize();
        Ok(())
    }

    /// Stores `value` only if `key` has no live entry.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn put_if_empty(&mut self, key: Key, value: TaggedValue) -> CacheResult<()> {
        if self.has_live_entry(&key) {
            return Ok(());
        }
        self.put(key, value)
    }

    /// Copies the value of `from` to `to` if `to` has no live entry.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn copy_if_empty(&mut self, from: Key, to: Key) -> CacheResult<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        if self.has_live_entry(&to) {
            return Ok(());
        }
        let value = self.get(from);
        if value.bytes.is_empty() {
            return Ok(());
        }
        self.put(to, value)
    }

    /// Moves the entry of `from` to `to` if `to` has no live entry.
    ///
    /// The value file is reused, so no bytes are copied. The `Store` of `to`
    /// reaches the binlog before the removal of `from`: a crash in between
    /// leaves both keys sharing the file, which stays until the last of them
    /// is removed.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the store is not open
    /// - [`Error::Io`] if the binlog cannot be written
    pub fn move_if_empty(&mut self, from: Key, to: Key) -> CacheResult<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        if self.has_live_entry(&to) || !self.has_live_entry(&from) {
            return Ok(());
        }
        if self.map.contains_key(&to) {
            // A stale entry still occupies the target.
            self.remove(to)?;
        }
        let Some(entry) = self.map.get(&from).copied() else {
            return Ok(());
        };

        self.removing.remove(&to);
        self.stale.remove(&to);
        let time = self.next_record_time();
        let record = StoreRecord {
            key: to,
            tag: entry.tag,
            size: entry.size,
            place: entry.place,
            checksum: entry.checksum,
            time,
        };
        if !self.append_record(&BinlogRecord::Store(record)) {
            return Err(Error::io(self.binlog_path()));
        }
        self.set_map_entry(
            to,
            Entry {
                use_time: time.relative,
                ..entry
            },
        );

        self.erase_map_entry(&from);
        self.binlog_excess += self.format.store_size() as u64;
        self.stale.remove(&from);
        self.accessed.remove(&from);
        self.removing.insert(from);
        self.write_multi_remove();
        self.optimize();
        Ok(())
    }

    /// Returns the value of `key`, or empty bytes if it is absent, pending
    /// removal, stale or corrupt.
    pub fn get(&mut self, key: Key) -> TaggedValue {
        if !self.is_open() || self.removing.contains(&key) || self.stale.contains(&key) {
            return TaggedValue::default();
        }
        let Some(entry) = self.map.get(&key).copied() else {
            return TaggedValue::default();
        };
        let Some(bytes) = self.read_value_data(&entry.place, entry.size) else {
            return TaggedValue::default();
        };
        if crc32fast::hash(&bytes) != entry.checksum {
            tracing::debug!(%key, place = %entry.place, "value checksum mismatch");
            return TaggedValue::default();
        }
        self.record_entry_access(key);
        TaggedValue::new(bytes, entry.tag)
    }

    /// Returns the value of `key` together with the stored sizes of `keys`.
    pub fn get_with_sizes(&mut self, key: Key, keys: &[Key]) -> (TaggedValue, Vec<Option<u32>>) {
        let value = self.get(key);
        let sizes = keys
            .iter()
            .map(|other| {
                self.has_live_entry(other)
                    .then(|| self.map.get(other).map(|entry| entry.size))
                    .flatten()
            })
            .collect();
        (value, sizes)
    }

    /// Removes `key`. Removing an absent key succeeds.
    ///
    /// The entry disappears from the index immediately; the binlog record
    /// is bundled.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the store is not open
    /// - [`Error::Io`] if the value file exists but cannot be deleted
    pub fn remove(&mut self, key: Key) -> CacheResult<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.stale.remove(&key);
        let Some(entry) = self.erase_map_entry(&key) else {
            return Ok(());
        };
        self.binlog_excess += self.format.store_size() as u64;
        self.schedule_remove(key);
        if self.places.contains_key(&entry.place) {
            // Another key still reads this file.
            return Ok(());
        }

        let path = self.place_path(&entry.place);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to delete value");
                Err(Error::io(path))
            }
        }
    }

    /// Clears every entry with `tag`.
    ///
    /// The entries read as absent at once and are deleted in chunks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the store is not open.
    pub fn clear_by_tag(&mut self, tag: u8) -> CacheResult<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        let had_stale = !self.stale.is_empty();
        let victims: Vec<Key> = self
            .map
            .iter()
            .filter(|(_, entry)| entry.tag == tag)
            .map(|(key, _)| *key)
            .collect();
        tracing::debug!(tag, count = victims.len(), "clearing tag");
        self.stale.extend(victims);
        if !had_stale {
            self.start_stale_clear();
        }
        Ok(())
    }

    /// Returns the keys of every live entry in key order.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .map
            .keys()
            .filter(|key| !self.stale.contains(key))
            .copied()
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Reads the value of `key` and checks it against its checksum without
    /// recording an access. Returns `None` if `key` has no live entry.
    #[must_use]
    pub fn verify_value(&self, key: Key) -> Option<bool> {
        if !self.has_live_entry(&key) {
            return None;
        }
        let entry = self.map.get(&key)?;
        let intact = self
            .read_value_data(&entry.place, entry.size)
            .is_some_and(|bytes| crc32fast::hash(&bytes) == entry.checksum);
        Some(intact)
    }

    pub(super) fn has_live_entry(&self, key: &Key) -> bool {
        self.map.contains_key(key) && !self.stale.contains(key)
    }

    fn next_record_time(&mut self) -> EstimatedTimePoint {
        if !self.format.track_time {
            return EstimatedTimePoint::default();
        }
        let point = self.count_time_point();
        self.apply_time_point(point);
        self.time
    }

    fn fresh_place(&self) -> PlaceId {
        self.fresh_place_from(PlaceId::random)
    }

    /// Returns the first candidate that no entry references and no file
    /// occupies. An entry whose file is gone still owns its place.
    pub(super) fn fresh_place_from(&self, mut candidate: impl FnMut() -> PlaceId) -> PlaceId {
        loop {
            let place = candidate();
            if !self.places.contains_key(&place) && !self.place_path(&place).exists() {
                return place;
            }
        }
    }

    fn read_value_data(&self, place: &PlaceId, size: u32) -> Option<Vec<u8>> {
        let key = self.key.as_ref()?;
        let path = self.place_path(place);
        let mut file = match EncryptedFile::open(&path, Mode::Read, key) {
            Ok(file) => file,
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "failed to open value");
                return None;
            }
        };
        file.read_with_padding(size as usize)
    }

    fn write_value_data(&self, path: &Path, bytes: &[u8]) -> CacheResult<()> {
        let key = self.key.as_ref().ok_or(Error::Closed)?;
        let mut file = EncryptedFile::open(path, Mode::Write, key).map_err(|error| match error {
            StorageError::LockFailed => Error::LockFailed {
                path: path.to_path_buf(),
            },
            _ => Error::io(path),
        })?;
        if !file.write_with_padding(bytes) || !file.flush() {
            tracing::warn!(path = %path.display(), "failed to write value");
            return Err(Error::io(path));
        }
        Ok(())
    }
}
