//! The cache engine.
//!
//! [`DatabaseObject`] owns the in-memory key → entry index, the open binlog
//! and the helpers working on its behalf. It is driven by exactly one
//! worker thread (see [`Database`](crate::Database)), so it takes no locks.
//!
//! # Lifecycle
//!
//! ```text
//! Closed ──open──▶ Open ──close/drop──▶ Closed
//!                   │
//!                   └──clear──▶ Open (fresh generation)
//! ```
//!
//! Opening reads the `version` file, opens that generation's binlog and
//! replays it. A binlog that cannot be used for any reason other than a
//! wrong key or a held lock is abandoned: a new generation is allocated
//! and the cleaner deletes the old one in the background.

mod bundles;
mod compaction;
mod prune;
mod timers;
mod values;

#[cfg(test)]
mod tests;

use crate::binlog::{
    BinlogHeader, BinlogReader, BinlogRecord, Clock, EstimatedTimePoint, RecordFormat,
    StoreRecord, BINLOG_HEADER_SIZE,
};
use crate::cleaner::Cleaner;
use crate::compactor::Compactor;
use crate::config::{Settings, SettingsUpdate};
use crate::dir::StoreDir;
use crate::error::{CacheResult, Error};
use crate::queue::{Mailbox, Task};
use crate::stats::{Stats, StatsFeed, TaggedSummary};
use crate::types::{Key, PlaceId};
use stashdb_storage::{EncryptedFile, EncryptionKey, Mode, StorageError, StorageResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Instant;
use timers::Timers;

/// Logical time given to a fresh binlog. Zero marks untracked entries.
const INITIAL_RELATIVE_TIME: u64 = 1;

/// Index entry of one cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub place: PlaceId,
    pub tag: u8,
    pub checksum: u32,
    pub size: u32,
    /// Logical time of the last access, 0 when time is not tracked.
    pub use_time: u64,
}

/// The engine behind a [`Database`](crate::Database).
pub struct DatabaseObject {
    dir: StoreDir,
    settings: Settings,
    mailbox: Mailbox,
    clock: Clock,

    key: Option<EncryptionKey>,
    version: u32,
    binlog: Option<EncryptedFile>,
    format: RecordFormat,
    time: EstimatedTimePoint,

    map: HashMap<Key, Entry>,
    /// Places referenced by `map`, with the number of entries using each.
    places: HashMap<PlaceId, usize>,
    /// Keys removed but not yet written as `MultiRemove`.
    removing: BTreeSet<Key>,
    /// Keys read but not yet written as `MultiAccess`.
    accessed: BTreeSet<Key>,
    /// Keys selected for eviction, removed a chunk at a time.
    stale: BTreeSet<Key>,

    /// Binlog bytes made obsolete since the last compaction.
    binlog_excess: u64,
    total_size: u64,
    tagged: BTreeMap<u8, TaggedSummary>,
    /// Oldest `use_time` in the map, 0 when unknown.
    minimal_entry_time: u64,
    entries_with_minimal_time: usize,

    timers: Timers,
    cleaner: Option<Cleaner>,
    cleaner_waiters: Vec<Task>,
    compactor: Option<Compactor>,
    compactor_next_attempt: Option<Instant>,
    stats: StatsFeed,
}

impl DatabaseObject {
    /// Creates a closed engine for the store rooted at `base`.
    ///
    /// `mailbox` must feed the thread that drives this object; helpers post
    /// their results through it.
    pub fn new(base: impl Into<PathBuf>, settings: Settings, mailbox: Mailbox, clock: Clock) -> Self {
        let format = RecordFormat::new(settings.track_estimated_time);
        Self {
            dir: StoreDir::new(base),
            settings,
            mailbox,
            clock,
            key: None,
            version: 0,
            binlog: None,
            format,
            time: EstimatedTimePoint::default(),
            map: HashMap::new(),
            places: HashMap::new(),
            removing: BTreeSet::new(),
            accessed: BTreeSet::new(),
            stale: BTreeSet::new(),
            binlog_excess: 0,
            total_size: 0,
            tagged: BTreeMap::new(),
            minimal_entry_time: 0,
            entries_with_minimal_time: 0,
            timers: Timers::default(),
            cleaner: None,
            cleaner_waiters: Vec::new(),
            compactor: None,
            compactor_next_attempt: None,
            stats: StatsFeed::default(),
        }
    }

    /// Returns the store root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.base()
    }

    /// Returns the active settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns true if a binlog is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.binlog.is_some()
    }

    /// Returns the current generation.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the payload size of the open binlog.
    #[must_use]
    pub fn binlog_size(&self) -> u64 {
        self.binlog.as_ref().map_or(0, EncryptedFile::size)
    }

    /// Returns the binlog bytes made obsolete since the last compaction.
    #[must_use]
    pub fn binlog_excess(&self) -> u64 {
        self.binlog_excess
    }

    /// Opens the store with `key`, replaying its binlog.
    ///
    /// An already open store is closed first.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSettings`] if the settings are inconsistent
    /// - [`Error::WrongKey`] if the binlog was written with another key
    ///   (unless `clear_on_wrong_key` is set)
    /// - [`Error::LockFailed`] if another instance holds the binlog
    /// - [`Error::Io`] if no binlog could be created
    pub fn open(&mut self, key: EncryptionKey) -> CacheResult<()> {
        if self.is_open() {
            self.close();
        }
        self.settings.validate()?;
        self.format = RecordFormat::new(self.settings.track_estimated_time);

        if let Err(error) = self.open_some_binlog(&key) {
            tracing::warn!(path = %self.dir.base().display(), %error, "failed to open store");
            self.clear_state();
            return Err(error);
        }
        self.key = Some(key);
        self.start_cleaner();
        self.read_binlog();
        tracing::info!(
            path = %self.dir.base().display(),
            version = self.version,
            entries = self.map.len(),
            bytes = self.total_size,
            "store opened"
        );
        Ok(())
    }

    /// Flushes pending bundles and releases the binlog.
    pub fn close(&mut self) {
        if self.binlog.is_some() {
            self.write_bundles();
            if let Some(mut binlog) = self.binlog.take() {
                binlog.flush();
            }
            tracing::debug!(path = %self.dir.base().display(), "store closed");
        }
        self.clear_state();
    }

    /// Drops every entry by switching to a fresh generation.
    ///
    /// The old generation is deleted in the background by the cleaner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the store is not open, or the error of
    /// reopening.
    pub fn clear(&mut self) -> CacheResult<()> {
        let Some(key) = self.key.clone() else {
            return Err(Error::Closed);
        };
        self.close();
        let version = self.dir.find_available_version();
        if let Err(error) = self.dir.write_version(version) {
            tracing::warn!(%error, "failed to write version");
            return Err(Error::io(self.dir.version_path()));
        }
        self.open(key)
    }

    /// Changes the size and time limits of the store.
    ///
    /// An update that would make the settings invalid is ignored.
    pub fn update_settings(&mut self, update: SettingsUpdate) {
        if let Err(error) = self.settings.apply(&update) {
            tracing::warn!(%error, "ignoring settings update");
            return;
        }
        if self.is_open() {
            self.optimize();
        }
    }

    /// Replaces the settings of a closed store.
    ///
    /// On an open store only the runtime-updatable limits are applied.
    pub fn reconfigure(&mut self, settings: Settings) {
        if self.is_open() {
            self.update_settings(SettingsUpdate {
                total_size_limit: settings.total_size_limit,
                total_time_limit: settings.total_time_limit,
            });
        } else {
            self.settings = settings;
        }
    }

    /// Writes pending remove and access bundles.
    pub fn sync(&mut self) {
        self.write_bundles();
        if let Some(binlog) = self.binlog.as_mut() {
            binlog.sync();
        }
    }

    /// Removes all pending stale entries, then runs `done` once no cleaner
    /// is running.
    pub fn wait_for_cleaner(&mut self, done: Task) {
        while !self.stale.is_empty() {
            self.clear_stale_chunk();
        }
        if self.cleaner.is_some() {
            self.cleaner_waiters.push(done);
        } else {
            done(self);
        }
    }

    /// Called on the worker thread when the cleaner finishes.
    pub fn cleaner_done(&mut self, result: CacheResult<()>) {
        if let Err(error) = result {
            tracing::warn!(%error, "cleaner failed");
        }
        self.cleaner = None;
        self.schedule_stats();
        self.run_cleaner_waiters();
    }

    /// Adds a statistics subscriber.
    pub fn subscribe_stats(&mut self, sender: Sender<Stats>) {
        let current = self.current_stats();
        self.stats.subscribe(sender, current);
    }

    /// Returns the current statistics.
    #[must_use]
    pub fn current_stats(&self) -> Stats {
        Stats {
            full: TaggedSummary {
                count: self.map.len() as u64,
                total_size: self.total_size,
            },
            tagged: self.tagged.clone(),
            clearing: self.cleaner.is_some() || !self.stale.is_empty(),
            compacting: self.compactor.is_some(),
        }
    }

    /// Earliest pending timer, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn open_some_binlog(&mut self, key: &EncryptionKey) -> CacheResult<()> {
        let Some(version) = self.dir.read_version() else {
            return self.open_new_binlog(key);
        };
        match self.open_binlog(version, Mode::ReadAppend, key) {
            Ok(()) => Ok(()),
            Err(StorageError::LockFailed) => Err(Error::LockFailed {
                path: self.dir.binlog_path(version),
            }),
            Err(StorageError::WrongKey) if !self.settings.clear_on_wrong_key => {
                Err(Error::WrongKey {
                    path: self.dir.binlog_path(version),
                })
            }
            Err(error) => {
                tracing::warn!(
                    path = %self.dir.binlog_path(version).display(),
                    %error,
                    "binlog unusable, starting a new generation"
                );
                self.open_new_binlog(key)
            }
        }
    }

    fn open_new_binlog(&mut self, key: &EncryptionKey) -> CacheResult<()> {
        let version = self.dir.find_available_version();
        if let Err(error) = self.dir.write_version(version) {
            tracing::warn!(%error, "failed to write version");
            return Err(Error::io(self.dir.version_path()));
        }
        let path = self.dir.binlog_path(version);
        match self.open_binlog(version, Mode::Write, key) {
            Ok(()) => Ok(()),
            Err(StorageError::LockFailed) => Err(Error::LockFailed { path }),
            Err(_) => Err(Error::io(path)),
        }
    }

    fn open_binlog(&mut self, version: u32, mode: Mode, key: &EncryptionKey) -> StorageResult<()> {
        let path = self.dir.binlog_path(version);
        let ready = self.dir.ready_path(version);
        if ready.exists() {
            fs::rename(&ready, &path)?;
            tracing::info!(path = %path.display(), "promoted compacted binlog");
        }

        let mut file = EncryptedFile::open(&path, mode, key)?;
        if mode == Mode::ReadAppend && file.size() > 0 {
            self.read_header(&mut file)?;
        } else {
            self.write_header(&mut file)?;
        }

        let compact = self.dir.compact_path(version);
        if compact.exists() {
            let _ = fs::remove_file(&compact);
        }
        self.version = version;
        self.binlog = Some(file);
        Ok(())
    }

    fn read_header(&mut self, file: &mut EncryptedFile) -> StorageResult<()> {
        let mut bytes = [0u8; BINLOG_HEADER_SIZE];
        if !file.seek(0) || file.read(&mut bytes) != BINLOG_HEADER_SIZE {
            return Err(StorageError::failed("truncated binlog header"));
        }
        let header = BinlogHeader::from_bytes(&bytes)
            .ok_or_else(|| StorageError::failed("unknown binlog format"))?;
        if header.format != self.format {
            return Err(StorageError::failed("binlog format does not match settings"));
        }
        self.time = EstimatedTimePoint::new(INITIAL_RELATIVE_TIME, header.system_time);
        Ok(())
    }

    fn write_header(&mut self, file: &mut EncryptedFile) -> StorageResult<()> {
        let now = (self.clock)().max(1);
        let header = BinlogHeader {
            format: self.format,
            system_time: now,
        };
        let mut bytes = header.to_bytes();
        if file.write(&mut bytes) != BINLOG_HEADER_SIZE || !file.flush() {
            return Err(StorageError::failed("failed to write binlog header"));
        }
        self.time = EstimatedTimePoint::new(INITIAL_RELATIVE_TIME, now);
        Ok(())
    }

    fn read_binlog(&mut self) {
        let Some(mut binlog) = self.binlog.take() else {
            return;
        };
        let outcome = BinlogReader::new(
            &mut binlog,
            self.format,
            self.settings.max_bundled_records,
            self.settings.read_block_size,
        )
        .read_till_end(|record| self.apply_record(record));

        if !outcome.complete || outcome.valid_till != binlog.size() {
            tracing::warn!(
                path = %binlog.path().display(),
                valid = outcome.valid_till,
                size = binlog.size(),
                "discarding binlog tail"
            );
            if !binlog.truncate(outcome.valid_till) {
                binlog.seek(outcome.valid_till);
            }
        } else {
            binlog.seek(outcome.valid_till);
        }
        tracing::debug!(records = outcome.records, "binlog replayed");
        self.binlog = Some(binlog);
        self.optimize();
    }

    fn apply_record(&mut self, record: BinlogRecord) -> bool {
        let size = record.encoded_size(self.format) as u64;
        match record {
            BinlogRecord::Store(store) => self.apply_store(&store),
            BinlogRecord::MultiStore(parts) => {
                if !parts.iter().all(Self::valid_store) {
                    return false;
                }
                for part in &parts {
                    self.apply_store(part);
                }
                true
            }
            BinlogRecord::MultiRemove(keys) => {
                self.binlog_excess += size;
                for key in keys {
                    if self.erase_map_entry(&key).is_some() {
                        self.binlog_excess += self.format.store_size() as u64;
                    }
                }
                true
            }
            BinlogRecord::MultiAccess { time, keys } => {
                if !self.format.track_time {
                    return false;
                }
                self.binlog_excess += size;
                self.apply_time_point(time);
                for key in keys {
                    if let Some(mut entry) = self.map.get(&key).copied() {
                        entry.use_time = time.relative;
                        self.set_map_entry(key, entry);
                    }
                }
                true
            }
        }
    }

    fn valid_store(store: &StoreRecord) -> bool {
        store.size > 0
    }

    fn apply_store(&mut self, store: &StoreRecord) -> bool {
        if !Self::valid_store(store) {
            return false;
        }
        let use_time = if self.format.track_time {
            self.apply_time_point(store.time);
            store.time.relative
        } else {
            0
        };
        if self.map.contains_key(&store.key) {
            self.binlog_excess += self.format.store_size() as u64;
        }
        self.set_map_entry(
            store.key,
            Entry {
                place: store.place,
                tag: store.tag,
                checksum: store.checksum,
                size: store.size,
                use_time,
            },
        );
        true
    }

    fn clear_state(&mut self) {
        self.key = None;
        self.map.clear();
        self.places.clear();
        self.removing.clear();
        self.accessed.clear();
        self.stale.clear();
        self.time = EstimatedTimePoint::default();
        self.binlog_excess = 0;
        self.total_size = 0;
        self.tagged.clear();
        self.minimal_entry_time = 0;
        self.entries_with_minimal_time = 0;
        self.timers = Timers::default();
        self.cleaner = None;
        self.compactor = None;
        self.compactor_next_attempt = None;
        self.push_stats();
        self.run_cleaner_waiters();
    }

    fn start_cleaner(&mut self) {
        self.cleaner = Cleaner::start(self.dir.clone(), self.mailbox.clone());
    }

    fn run_cleaner_waiters(&mut self) {
        if self.cleaner.is_some() || !self.stale.is_empty() {
            return;
        }
        for waiter in std::mem::take(&mut self.cleaner_waiters) {
            waiter(self);
        }
    }

    /// Inserts or replaces an entry, keeping totals and the minimal time in
    /// step.
    fn set_map_entry(&mut self, key: Key, entry: Entry) {
        let already = self.map.insert(key, entry);
        let previous_time = already.map_or(0, |already| already.use_time);
        *self.places.entry(entry.place).or_default() += 1;
        if let Some(already) = already {
            self.total_size -= u64::from(already.size);
            self.untag(already.tag, already.size);
            self.release_place(&already.place);
        }
        self.total_size += u64::from(entry.size);
        self.tagged.entry(entry.tag).or_default().add(entry.size);

        if entry.use_time != 0 {
            self.track_minimal_time(entry.use_time, previous_time);
        }
        self.schedule_stats();
    }

    fn track_minimal_time(&mut self, time: u64, previous_time: u64) {
        if self.minimal_entry_time == 0 {
            // Unknown stays unknown until the next full scan, unless this is
            // the only entry.
            if self.map.len() == 1 {
                self.minimal_entry_time = time;
                self.entries_with_minimal_time = 1;
            }
        } else if time < self.minimal_entry_time {
            self.minimal_entry_time = time;
            self.entries_with_minimal_time = 1;
        } else if previous_time != time {
            if time == self.minimal_entry_time {
                self.entries_with_minimal_time += 1;
            } else if previous_time == self.minimal_entry_time {
                self.forget_minimal_entry();
            }
        }
    }

    fn erase_map_entry(&mut self, key: &Key) -> Option<Entry> {
        let entry = self.map.remove(key)?;
        self.total_size -= u64::from(entry.size);
        self.untag(entry.tag, entry.size);
        self.release_place(&entry.place);
        if self.minimal_entry_time != 0 && entry.use_time == self.minimal_entry_time {
            self.forget_minimal_entry();
        }
        if self.map.is_empty() {
            self.minimal_entry_time = 0;
            self.entries_with_minimal_time = 0;
        }
        self.schedule_stats();
        Some(entry)
    }

    fn release_place(&mut self, place: &PlaceId) {
        if let Some(count) = self.places.get_mut(place) {
            *count -= 1;
            if *count == 0 {
                self.places.remove(place);
            }
        }
    }

    fn forget_minimal_entry(&mut self) {
        self.entries_with_minimal_time = self.entries_with_minimal_time.saturating_sub(1);
        if self.entries_with_minimal_time == 0 {
            self.minimal_entry_time = 0;
        }
    }

    fn untag(&mut self, tag: u8, size: u32) {
        if let Some(summary) = self.tagged.get_mut(&tag) {
            summary.subtract(size);
            if summary.count == 0 {
                self.tagged.remove(&tag);
            }
        }
    }

    fn count_time_point(&self) -> EstimatedTimePoint {
        self.time.advanced((self.clock)())
    }

    fn apply_time_point(&mut self, point: EstimatedTimePoint) {
        if point.relative > self.time.relative {
            self.time = point;
        }
    }

    fn binlog_path(&self) -> PathBuf {
        self.dir.binlog_path(self.version)
    }

    fn place_path(&self, place: &PlaceId) -> PathBuf {
        self.dir.place_path(self.version, place)
    }

    /// Appends `record` to the binlog. A partially written record is cut
    /// off again.
    fn append_record(&mut self, record: &BinlogRecord) -> bool {
        let format = self.format;
        let Some(binlog) = self.binlog.as_mut() else {
            return false;
        };
        let mut bytes = record.encode(format);
        let start = binlog.offset();
        if binlog.write(&mut bytes) == bytes.len() && binlog.flush() {
            return true;
        }
        tracing::warn!(path = %binlog.path().display(), "binlog append failed");
        binlog.truncate(start);
        false
    }

    /// Schedules pruning if due, otherwise considers compaction.
    fn optimize(&mut self) {
        if !self.start_delayed_pruning() {
            self.check_compactor();
        }
    }
}

impl Drop for DatabaseObject {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DatabaseObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseObject")
            .field("path", &self.dir.base())
            .field("version", &self.version)
            .field("open", &self.is_open())
            .field("entries", &self.map.len())
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}
