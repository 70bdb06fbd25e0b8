//! Crash recovery testing for stashdb.
//!
//! A crash can leave the binlog cut at any byte. This module records a
//! store's expected state after every operation, then cuts a copy of the
//! binlog at each payload offset and checks that reopening yields exactly
//! the state of the longest operation prefix that fits.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stashdb_testkit::crash::CrashHarness;
//!
//! let mut harness = CrashHarness::new();
//! harness.put(1, b"one");
//! harness.remove(1);
//! let report = harness.check_truncations(1);
//! assert!(report.failures.is_empty());
//! ```

use crate::fixtures::{call, TestStore};
use stashdb_core::dir::StoreDir;
use stashdb_core::{Database, Error, Key, Settings, TaggedValue};
use stashdb_storage::PHYSICAL_HEADER_SIZE;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use tempfile::TempDir;

/// Expected index after one operation.
#[derive(Debug, Clone)]
struct Checkpoint {
    /// Binlog payload size once the operation's record is on disk.
    binlog_size: u64,
    values: BTreeMap<Key, TaggedValue>,
}

/// Result of a truncation sweep.
#[derive(Debug, Clone, Default)]
pub struct CrashReport {
    /// Number of truncation offsets checked.
    pub checked: usize,
    /// Descriptions of offsets whose recovered state was wrong.
    pub failures: Vec<String>,
}

/// Drives a store whose every operation reaches the binlog at once.
pub struct CrashHarness {
    store: TestStore,
    values: BTreeMap<Key, TaggedValue>,
    checkpoints: Vec<Checkpoint>,
}

impl CrashHarness {
    /// Creates a harness over a fresh store.
    pub fn new() -> Self {
        let store = TestStore::with_settings(harness_settings());
        store.open().expect("Failed to open store");
        let mut harness = Self {
            store,
            values: BTreeMap::new(),
            checkpoints: Vec::new(),
        };
        harness.checkpoint();
        harness
    }

    /// Stores `bytes` under `key`.
    pub fn put(&mut self, key: u128, bytes: &[u8]) {
        self.store.put(key, bytes).expect("Failed to put");
        self.values
            .insert(Key::from(key), TaggedValue::new(bytes.to_vec(), 0));
        self.checkpoint();
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: u128) {
        self.store.remove(key).expect("Failed to remove");
        if self.values.remove(&Key::from(key)).is_some() {
            self.checkpoint();
        }
    }

    fn checkpoint(&mut self) {
        self.checkpoints.push(Checkpoint {
            binlog_size: self.store.binlog_size(),
            values: self.values.clone(),
        });
    }

    /// Cuts a copy of the binlog at every `step`-th payload offset and
    /// checks the recovered state.
    pub fn check_truncations(&self, step: usize) -> CrashReport {
        let mut report = CrashReport::default();
        let source = self.store.root();
        let version = self.store.version();
        let end = self.store.binlog_size();

        for cut in (0..=end).step_by(step.max(1)) {
            report.checked += 1;
            if let Err(failure) = self.check_cut(source, version, cut) {
                report.failures.push(format!("cut at {cut}: {failure}"));
            }
        }
        report
    }

    fn check_cut(&self, source: &Path, version: u32, cut: u64) -> Result<(), String> {
        let temp = TempDir::new().map_err(|e| e.to_string())?;
        let root = temp.path().join("store");
        copy_dir(source, &root).map_err(|e| format!("copy failed: {e}"))?;
        truncate_binlog(&root, version, cut).map_err(|e| format!("truncate failed: {e}"))?;

        let database =
            Database::new(&root, harness_settings()).map_err(|e| e.to_string())?;
        let key = self.store.key.clone();
        call(|done| database.open(key, done))
            .unwrap_or(Err(Error::Closed))
            .map_err(|e| format!("open failed: {e}"))?;

        let (size, count, recovered_version) = database
            .invoke(|object| {
                (
                    object.binlog_size(),
                    object.current_stats().full.count,
                    object.version(),
                )
            })
            .map_err(|e| e.to_string())?;

        let expected = self
            .checkpoints
            .iter()
            .rev()
            .find(|checkpoint| checkpoint.binlog_size <= cut);
        let Some(expected) = expected else {
            // Not even the binlog header survived: the store starts empty,
            // in place or in a new generation.
            if count != 0 {
                return Err(format!(
                    "expected an empty store, got version {recovered_version} with {count} entries"
                ));
            }
            return Ok(());
        };
        if recovered_version != version {
            return Err(format!("moved to generation {recovered_version}"));
        }

        if size != expected.binlog_size {
            return Err(format!("binlog size {size}, expected {}", expected.binlog_size));
        }
        if count != expected.values.len() as u64 {
            return Err(format!("{count} entries, expected {}", expected.values.len()));
        }
        for (key, value) in &expected.values {
            let key = *key;
            let actual = database
                .invoke(move |object| object.get(key))
                .map_err(|e| e.to_string())?;
            // A value file may already hold a later write or be deleted;
            // that degrades to a miss, never to a wrong value.
            if !actual.bytes.is_empty() && actual != *value {
                return Err(format!("key {key} returned a value from another state"));
            }
        }
        Ok(())
    }
}

impl Default for CrashHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// One-part bundles put every remove on disk immediately; no time
/// tracking keeps access records out of the binlog.
fn harness_settings() -> Settings {
    Settings::default()
        .max_bundled_records(1)
        .compact_chunk_size(1)
        .track_estimated_time(false)
        .compact_after_excess(0)
}

/// Cuts the binlog of `version` under `root` to `payload` bytes.
pub fn truncate_binlog(root: &Path, version: u32, payload: u64) -> io::Result<()> {
    let path = StoreDir::new(root).binlog_path(version);
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(PHYSICAL_HEADER_SIZE + payload)
}

/// Recursively copies a directory.
pub fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
