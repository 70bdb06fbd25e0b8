//! # stashdb Storage
//!
//! Encrypted file primitive for the stashdb cache store.
//!
//! This crate provides the lowest-level storage abstraction for stashdb:
//! an OS file whose payload is transparently encrypted with AES-256-CTR.
//! It does not interpret the payload - binlog records and cached values
//! are the business of `stashdb_core`.
//!
//! ## Design Principles
//!
//! - Every file carries its own random salt; the master key never touches disk
//! - A keyed header checksum distinguishes a wrong key from corruption
//! - Reads and writes are block aligned and report short counts instead of
//!   failing, so a torn tail after a crash is simply "the end"
//!
//! ## Example
//!
//! ```rust
//! use stashdb_storage::{EncryptedFile, EncryptionKey, Mode};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("value");
//! let key = EncryptionKey::generate();
//!
//! let mut file = EncryptedFile::open(&path, Mode::Write, &key).unwrap();
//! assert!(file.write_with_padding(b"hello world"));
//! drop(file);
//!
//! let mut file = EncryptedFile::open(&path, Mode::Read, &key).unwrap();
//! assert_eq!(file.read_with_padding(11).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod encryption;
mod error;
mod file;

pub use encryption::{
    random_salt, CtrState, EncryptionKey, BLOCK_SIZE, CIPHER_KEY_SIZE, IV_SIZE, KEY_SIZE,
    SALT_SIZE,
};
pub use error::{StorageError, StorageResult};
pub use file::{padded_size, EncryptedFile, Mode, FILE_MAGIC, HEADER_SIZE, PHYSICAL_HEADER_SIZE};
