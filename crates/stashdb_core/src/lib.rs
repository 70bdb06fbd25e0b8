//! # stashdb Core
//!
//! Encrypted local cache store.
//!
//! This crate provides:
//! - An append-only encrypted binlog indexing values by 128-bit key
//! - Value files addressed by random place ids
//! - Size and time based eviction, tag partitions and tag-wide clearing
//! - Background compaction of the binlog and removal of old generations
//! - A thread-safe [`Database`] façade and a per-path [`Databases`] registry
//!
//! ## Example
//!
//! ```rust,no_run
//! use stashdb_core::{Database, Key, Settings};
//! use stashdb_storage::EncryptionKey;
//!
//! let db = Database::new("cache", Settings::default()).unwrap();
//! db.open(EncryptionKey::generate(), |result| {
//!     if let Err(error) = result {
//!         eprintln!("cache unavailable: {error}");
//!     }
//! });
//! db.put(Key::from(1), b"ABC".to_vec(), |_| {});
//! let bytes = db.invoke(|object| object.get(Key::from(1)).bytes).unwrap();
//! assert_eq!(bytes, b"ABC");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod binlog;
pub mod cleaner;
pub mod compactor;
mod config;
mod database;
mod databases;
pub mod dir;
pub mod engine;
mod error;
pub mod guard;
mod queue;
mod stats;
mod types;

pub use config::{Settings, SettingsUpdate};
pub use database::Database;
pub use databases::{DatabasePointer, Databases};
pub use engine::DatabaseObject;
pub use error::{CacheResult, Error};
pub use queue::{Mailbox, Task};
pub use stats::{Stats, TaggedSummary, STATS_UPDATE_INTERVAL};
pub use types::{Key, PlaceId, TaggedValue};
