//! Benchmark utilities for stashdb.

use rand::Rng;
use stashdb_core::{Database, Key, Settings};
use stashdb_storage::EncryptionKey;
use std::sync::mpsc;
use tempfile::TempDir;

/// Generate random value bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` random keys.
pub fn random_keys(count: usize) -> Vec<Key> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| Key::new(rng.gen(), rng.gen())).collect()
}

/// An opened store in a temporary directory.
pub struct BenchStore {
    /// The store handle.
    pub db: Database,
    /// The store key.
    pub key: EncryptionKey,
    _temp_dir: TempDir,
}

impl BenchStore {
    /// Creates and opens a store with `settings`.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be opened.
    pub fn open(settings: Settings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::new(temp_dir.path().join("store"), settings)
            .expect("Failed to start store");
        let key = EncryptionKey::generate();
        let open_key = key.clone();
        db.invoke(move |object| object.open(open_key))
            .expect("Store worker is gone")
            .expect("Failed to open store");
        Self {
            db,
            key,
            _temp_dir: temp_dir,
        }
    }

    /// Stores `bytes` under `key` and waits for the result.
    ///
    /// # Panics
    ///
    /// Panics if the put fails.
    pub fn put(&self, key: Key, bytes: Vec<u8>) {
        let (sender, receiver) = mpsc::channel();
        self.db.put(key, bytes, move |result| {
            let _ = sender.send(result);
        });
        receiver
            .recv()
            .expect("Store worker is gone")
            .expect("Failed to put");
    }

    /// Reads `key` and waits for the bytes.
    ///
    /// # Panics
    ///
    /// Panics if the worker is gone.
    pub fn get(&self, key: Key) -> Vec<u8> {
        let (sender, receiver) = mpsc::channel();
        self.db.get(key, move |bytes| {
            let _ = sender.send(bytes);
        });
        receiver.recv().expect("Store worker is gone")
    }
}
