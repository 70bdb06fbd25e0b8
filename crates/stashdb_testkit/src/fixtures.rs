//! Test fixtures and store helpers.
//!
//! [`TestStore`] wraps a [`Database`] in a temporary directory and turns
//! its callback API into blocking calls, with a clock the test controls.

use stashdb_core::{CacheResult, Database, Error, Key, Settings, SettingsUpdate, Stats, TaggedValue};
use stashdb_storage::EncryptionKey;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Unix time the test clock starts at.
pub const TEST_START_TIME: u32 = 1_700_000_000;

/// How long a blocking wrapper waits for its callback.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A store in a temporary directory with automatic cleanup.
pub struct TestStore {
    /// The store handle.
    pub db: Database,
    /// The store key.
    pub key: EncryptionKey,
    settings: Settings,
    now: Arc<AtomicU32>,
    root: PathBuf,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Creates a closed store with default settings.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Creates a closed store with `settings`.
    pub fn with_settings(settings: Settings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("store");
        let now = Arc::new(AtomicU32::new(TEST_START_TIME));
        let db = new_database(&root, settings.clone(), &now);
        Self {
            db,
            key: EncryptionKey::generate(),
            settings,
            now,
            root,
            _temp_dir: temp_dir,
        }
    }

    /// Creates and opens a store with default settings.
    pub fn opened() -> Self {
        let store = Self::new();
        store.open().expect("Failed to open store");
        store
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Moves the test clock forward.
    pub fn advance(&self, seconds: u32) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Opens the store with its key.
    pub fn open(&self) -> CacheResult<()> {
        self.open_with(self.key.clone())
    }

    /// Opens the store with another key.
    pub fn open_with(&self, key: EncryptionKey) -> CacheResult<()> {
        call(|done| self.db.open(key, done)).unwrap_or(Err(Error::Closed))
    }

    /// Closes the store.
    pub fn close(&self) {
        let _ = call(|done| self.db.close(move || done(())));
    }

    /// Replaces the handle with a fresh one on the same directory, as after
    /// a process restart, and opens it.
    pub fn restart(&mut self) -> CacheResult<()> {
        self.restart_closed();
        self.open()
    }

    /// Replaces the handle with a fresh, closed one on the same directory.
    pub fn restart_closed(&mut self) {
        let fresh = new_database(&self.root, self.settings.clone(), &self.now);
        // The old handle closes and releases its lock when dropped here.
        self.db = fresh;
    }

    /// Changes the settings used by the next open.
    pub fn reconfigure(&mut self, settings: Settings) {
        self.settings = settings.clone();
        self.db.reconfigure(settings);
    }

    /// Changes the size and time limits of the open store.
    pub fn update_settings(&self, update: SettingsUpdate) {
        self.db.update_settings(update);
    }

    /// Stores `bytes` with tag 0.
    pub fn put(&self, key: impl Into<Key>, bytes: &[u8]) -> CacheResult<()> {
        self.put_tagged(key, TaggedValue::new(bytes.to_vec(), 0))
    }

    /// Stores a tagged value.
    pub fn put_tagged(&self, key: impl Into<Key>, value: TaggedValue) -> CacheResult<()> {
        let key = key.into();
        call(|done| self.db.put_tagged(key, value, done)).unwrap_or(Err(Error::Closed))
    }

    /// Reads the bytes of `key`, empty if absent.
    pub fn get(&self, key: impl Into<Key>) -> Vec<u8> {
        let key = key.into();
        call(|done| self.db.get(key, done)).unwrap_or_default()
    }

    /// Reads the tagged value of `key`.
    pub fn get_tagged(&self, key: impl Into<Key>) -> TaggedValue {
        let key = key.into();
        call(|done| self.db.get_with_tag(key, done)).unwrap_or_default()
    }

    /// Removes `key`.
    pub fn remove(&self, key: impl Into<Key>) -> CacheResult<()> {
        let key = key.into();
        call(|done| self.db.remove(key, done)).unwrap_or(Err(Error::Closed))
    }

    /// Moves `from` to `to` unless `to` has a value.
    pub fn move_if_empty(&self, from: impl Into<Key>, to: impl Into<Key>) -> CacheResult<()> {
        let (from, to) = (from.into(), to.into());
        call(|done| self.db.move_if_empty(from, to, done)).unwrap_or(Err(Error::Closed))
    }

    /// Clears the store.
    pub fn clear(&self) -> CacheResult<()> {
        call(|done| self.db.clear(done)).unwrap_or(Err(Error::Closed))
    }

    /// Clears every value with `tag`.
    pub fn clear_by_tag(&self, tag: u8) -> CacheResult<()> {
        call(|done| self.db.clear_by_tag(tag, done)).unwrap_or(Err(Error::Closed))
    }

    /// Writes pending bundles.
    pub fn sync(&self) {
        let _ = call(|done| self.db.sync(move || done(())));
    }

    /// Waits for pending stale removals and the cleaner.
    pub fn wait_for_cleaner(&self) {
        let _ = call(|done| self.db.wait_for_cleaner(move || done(())));
    }

    /// Subscribes to statistics.
    pub fn stats(&self) -> Receiver<Stats> {
        self.db.stats()
    }

    /// Returns the current statistics.
    pub fn current_stats(&self) -> Stats {
        self.db
            .invoke(|object| object.current_stats())
            .expect("Store worker is gone")
    }

    /// Returns the current generation.
    pub fn version(&self) -> u32 {
        self.db
            .invoke(|object| object.version())
            .expect("Store worker is gone")
    }

    /// Returns the binlog payload size.
    pub fn binlog_size(&self) -> u64 {
        self.db
            .invoke(|object| object.binlog_size())
            .expect("Store worker is gone")
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

fn new_database(root: &Path, settings: Settings, now: &Arc<AtomicU32>) -> Database {
    let clock_now = Arc::clone(now);
    Database::with_clock(root, settings, Arc::new(move || clock_now.load(Ordering::SeqCst)))
        .expect("Failed to start store")
}

/// Issues an asynchronous call and waits for its callback.
///
/// Returns `None` if the callback is dropped or does not arrive in time.
pub fn call<T, F>(issue: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(Box<dyn FnOnce(T) + Send>),
{
    let (sender, receiver): (Sender<T>, Receiver<T>) = mpsc::channel();
    issue(Box::new(move |value| {
        let _ = sender.send(value);
    }));
    receiver.recv_timeout(CALL_TIMEOUT).ok()
}

/// Runs a test with an opened temporary store.
///
/// # Example
///
/// ```rust,ignore
/// use stashdb_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         store.put(1u128, b"value").unwrap();
///         assert_eq!(store.get(1u128), b"value");
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestStore) -> R,
{
    let mut store = TestStore::opened();
    f(&mut store)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates an opened store holding `count` values of `size` bytes, keys
    /// `0..count`, tagged `key % tags`.
    pub fn populated_store(count: u64, size: usize, tags: u8) -> TestStore {
        let store = TestStore::opened();
        for n in 0..count {
            let tag = (n % u64::from(tags.max(1))) as u8;
            store
                .put_tagged(Key::new(0, n), value_for(n, size, tag))
                .expect("Failed to populate store");
        }
        store
    }

    /// Deterministic value used by [`populated_store`].
    pub fn value_for(n: u64, size: usize, tag: u8) -> TaggedValue {
        let bytes = (0..size).map(|i| (n as usize + i) as u8 | 1).collect();
        TaggedValue::new(bytes, tag)
    }
}
