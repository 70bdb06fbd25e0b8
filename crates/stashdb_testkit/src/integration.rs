//! End-to-end scenarios across the storage and core crates.
//!
//! [`IntegrationHarness`] tracks what a store should hold and checks it
//! after every step, including across restarts.

use crate::fixtures::TestStore;
use stashdb_core::{Key, Settings, TaggedValue};
use std::collections::HashMap;

/// A store plus the values it is expected to hold.
pub struct IntegrationHarness {
    /// The store under test.
    pub store: TestStore,
    values: HashMap<Key, TaggedValue>,
}

impl IntegrationHarness {
    /// Creates a harness over an opened store with default settings.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Creates a harness over an opened store with `settings`.
    pub fn with_settings(settings: Settings) -> Self {
        let store = TestStore::with_settings(settings);
        store.open().expect("Failed to open store");
        Self {
            store,
            values: HashMap::new(),
        }
    }

    /// Stores a tagged value and tracks it.
    pub fn put(&mut self, key: u128, bytes: &[u8], tag: u8) {
        let value = TaggedValue::new(bytes.to_vec(), tag);
        self.store
            .put_tagged(key, value.clone())
            .expect("Failed to put value");
        self.values.insert(Key::from(key), value);
    }

    /// Removes a key and stops tracking it.
    pub fn remove(&mut self, key: u128) {
        self.store.remove(key).expect("Failed to remove value");
        self.values.remove(&Key::from(key));
    }

    /// Clears a tag in the store and the tracked values.
    pub fn clear_by_tag(&mut self, tag: u8) {
        self.store.clear_by_tag(tag).expect("Failed to clear tag");
        self.values.retain(|_, value| value.tag != tag);
    }

    /// Reads a key and checks it against the tracked value.
    pub fn get_and_verify(&self, key: u128) -> TaggedValue {
        let key = Key::from(key);
        let actual = self.store.get_tagged(key);
        let expected = self.values.get(&key).cloned().unwrap_or_default();
        assert_eq!(actual, expected, "Value mismatch for {key}");
        actual
    }

    /// Checks every tracked value and the store totals.
    pub fn verify_all(&self) {
        for (key, expected) in &self.values {
            assert_eq!(&self.store.get_tagged(*key), expected, "Value mismatch for {key}");
        }
        let stats = self.store.current_stats();
        assert_eq!(stats.full.count, self.values.len() as u64);
        let total: u64 = self.values.values().map(|v| v.bytes.len() as u64).sum();
        assert_eq!(stats.full.total_size, total);
    }

    /// Restarts the store and checks that nothing was lost.
    pub fn restart_and_verify(&mut self) {
        self.store.restart().expect("Failed to reopen store");
        self.verify_all();
    }

    /// Returns the number of tracked values.
    pub fn tracked_count(&self) -> usize {
        self.values.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Put, restart, read back, then drop the value's tag.
pub fn scenario_tagged_roundtrip() {
    let mut harness = IntegrationHarness::new();
    harness.put(1, b"ABC", 5);
    harness.store.close();
    harness.store.open().expect("Failed to reopen store");
    assert_eq!(harness.get_and_verify(1).bytes, b"ABC");

    harness.clear_by_tag(5);
    assert!(harness.get_and_verify(1).bytes.is_empty());
}

/// Interleaves writes, removes and restarts over a few hundred keys.
pub fn scenario_mixed_history(rounds: u64) {
    let mut harness = IntegrationHarness::new();
    for round in 0..rounds {
        for n in 0..50u64 {
            let key = u128::from(n);
            match (n + round) % 4 {
                0 => harness.remove(key),
                _ => harness.put(key, format!("value {n} round {round}").as_bytes(), (n % 3) as u8),
            }
        }
        if round % 2 == 1 {
            harness.clear_by_tag((round % 3) as u8);
        }
        harness.restart_and_verify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::{Databases, Error};
    use stashdb_storage::EncryptionKey;

    #[test]
    fn tagged_roundtrip() {
        scenario_tagged_roundtrip();
    }

    #[test]
    fn mixed_history_survives_restarts() {
        scenario_mixed_history(6);
    }

    #[test]
    fn remove_is_visible_before_flush() {
        let mut harness = IntegrationHarness::new();
        harness.put(7, b"gone soon", 0);
        harness.remove(7);
        assert!(harness.get_and_verify(7).bytes.is_empty());
        harness.restart_and_verify();
    }

    #[test]
    fn identical_put_writes_nothing() {
        let mut harness =
            IntegrationHarness::with_settings(Settings::default().track_estimated_time(false));
        harness.put(1, b"same", 2);
        let size = harness.store.binlog_size();
        harness.put(1, b"same", 2);
        assert_eq!(harness.store.binlog_size(), size);
        harness.put(1, b"same", 3);
        assert!(harness.store.binlog_size() > size);
        assert_eq!(harness.tracked_count(), 1);
    }

    #[test]
    fn wrong_key_is_distinguishable() {
        let mut harness = IntegrationHarness::new();
        harness.put(1, b"secret", 0);
        harness.store.restart_closed();

        let result = harness.store.open_with(EncryptionKey::generate());
        assert!(matches!(result, Err(Error::WrongKey { .. })), "{result:?}");

        harness.store.open().expect("Failed to open with the right key");
        harness.verify_all();
    }

    #[test]
    fn move_keeps_target_value() {
        let mut harness = IntegrationHarness::new();
        harness.put(1, b"source", 0);
        harness.put(2, b"target", 0);
        harness.store.move_if_empty(1u128, 2u128).unwrap();
        assert_eq!(harness.store.get(2u128), b"target");

        harness.store.move_if_empty(2u128, 3u128).unwrap();
        assert!(harness.store.get(2u128).is_empty());
        assert_eq!(harness.store.get(3u128), b"target");
    }

    #[test]
    fn clear_starts_a_new_generation() {
        let mut harness = IntegrationHarness::new();
        harness.put(1, b"old", 0);
        let version = harness.store.version();
        harness.store.clear().unwrap();
        harness.store.wait_for_cleaner();
        assert_ne!(harness.store.version(), version);
        assert!(harness.store.get(1u128).is_empty());

        harness.store.put(1u128, b"new").unwrap();
        harness.store.restart().unwrap();
        assert_eq!(harness.store.get(1u128), b"new");
    }

    #[test]
    fn registry_handles_share_values() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("store");
        let key = EncryptionKey::generate();
        let databases = Databases::new();

        let first = databases.get(&path, Settings::default()).unwrap();
        let opened = crate::fixtures::call(|done| first.open(key.clone(), done));
        assert_eq!(opened, Some(Ok(())));
        let stored = crate::fixtures::call(|done| first.put(Key::from(9), b"shared".to_vec(), done));
        assert_eq!(stored, Some(Ok(())));

        let second = databases.get(&path, Settings::default()).unwrap();
        let read = crate::fixtures::call(|done| second.get(Key::from(9), done));
        assert_eq!(read.as_deref(), Some(&b"shared"[..]));
    }
}
