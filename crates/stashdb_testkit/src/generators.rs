//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, values and operation sequences, plus a
//! [`Model`] that predicts what a store should return after them.

use proptest::prelude::*;
use stashdb_core::{Key, TaggedValue};
use std::collections::BTreeMap;

/// Strategy for keys drawn from a small space, so that operations collide.
pub fn key_strategy(space: u64) -> impl Strategy<Value = Key> {
    (0..space.max(1)).prop_map(|low| Key::new(0, low))
}

/// Strategy for arbitrary keys.
pub fn any_key_strategy() -> impl Strategy<Value = Key> {
    (any::<u64>(), any::<u64>()).prop_map(|(high, low)| Key::new(high, low))
}

/// Strategy for non-empty values up to `max_size` bytes.
pub fn value_strategy(max_size: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max_size.max(1))
}

/// Strategy for tagged values with tags in `0..tags`.
pub fn tagged_value_strategy(max_size: usize, tags: u8) -> impl Strategy<Value = TaggedValue> {
    (value_strategy(max_size), 0..tags.max(1)).prop_map(|(bytes, tag)| TaggedValue::new(bytes, tag))
}

/// One store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Store a value.
    Put(Key, TaggedValue),
    /// Remove a key.
    Remove(Key),
    /// Read a key.
    Get(Key),
    /// Drop every value with a tag.
    ClearTag(u8),
}

/// Strategy for a single operation over `space` keys.
pub fn operation_strategy(space: u64, max_size: usize, tags: u8) -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => (key_strategy(space), tagged_value_strategy(max_size, tags))
            .prop_map(|(key, value)| Operation::Put(key, value)),
        2 => key_strategy(space).prop_map(Operation::Remove),
        2 => key_strategy(space).prop_map(Operation::Get),
        1 => (0..tags.max(1)).prop_map(Operation::ClearTag),
    ]
}

/// Strategy for operation sequences of up to `max_len` operations.
pub fn operations_strategy(
    max_len: usize,
    space: u64,
    max_size: usize,
    tags: u8,
) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(space, max_size, tags), 0..=max_len)
}

/// Reference model of a store without eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    values: BTreeMap<Key, TaggedValue>,
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `operation`, returning the value a `Get` should observe.
    pub fn apply(&mut self, operation: &Operation) -> Option<TaggedValue> {
        match operation {
            Operation::Put(key, value) => {
                if value.bytes.is_empty() {
                    self.values.remove(key);
                } else {
                    self.values.insert(*key, value.clone());
                }
                None
            }
            Operation::Remove(key) => {
                self.values.remove(key);
                None
            }
            Operation::Get(key) => Some(self.get(key)),
            Operation::ClearTag(tag) => {
                self.values.retain(|_, value| value.tag != *tag);
                None
            }
        }
    }

    /// Returns the expected value of `key`, empty if absent.
    pub fn get(&self, key: &Key) -> TaggedValue {
        self.values.get(key).cloned().unwrap_or_default()
    }

    /// Returns the expected live keys.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.values.keys()
    }

    /// Returns the expected number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no values are expected.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the expected total value size.
    pub fn total_size(&self) -> u64 {
        self.values.values().map(|value| value.bytes.len() as u64).sum()
    }
}
