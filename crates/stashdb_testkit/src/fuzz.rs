//! Fuzz testing harnesses for stashdb.
//!
//! These targets feed arbitrary bytes to the binlog decoder and to a
//! store's replay. They can be driven by cargo-fuzz or by the proptest
//! cases below. A target passes if it returns without panicking.

use crate::fixtures::call;
use stashdb_core::binlog::{read_record_size, BinlogHeader, BinlogRecord, RecordFormat, RecordSize};
use stashdb_core::dir::StoreDir;
use stashdb_core::{Database, Error, Key, Settings};
use stashdb_storage::{EncryptedFile, EncryptionKey, Mode};

/// Fuzz target for record decoding.
///
/// Walks `data` as a binlog payload the way replay does, decoding every
/// record the size reader accepts until the data runs out.
pub fn fuzz_record_decode(data: &[u8], track_time: bool) {
    let format = RecordFormat::new(track_time);
    let max_bundled = Settings::default().max_bundled_records;
    let mut offset = 0;
    while offset < data.len() {
        match read_record_size(&data[offset..], format, max_bundled) {
            RecordSize::Size(size) => {
                assert!(size > 0, "zero-sized record");
                if offset + size > data.len() {
                    break;
                }
                let _ = BinlogRecord::decode(&data[offset..offset + size], format);
                offset += size;
            }
            RecordSize::Unknown | RecordSize::Invalid => break,
        }
    }
}

/// Fuzz target for replay.
///
/// Writes a valid binlog header followed by `payload` into a fresh store
/// and opens it. Opening must succeed and reads must not panic.
pub fn fuzz_binlog_replay(payload: &[u8], track_time: bool) {
    let temp = tempfile::tempdir().expect("Failed to create temp directory");
    let root = temp.path().join("store");
    let key = EncryptionKey::generate();
    write_binlog(&root, &key, payload, track_time);

    let settings = Settings::default().track_estimated_time(track_time);
    let database = Database::new(&root, settings).expect("Failed to start store");
    let opened = call(|done| database.open(key, done)).unwrap_or(Err(Error::Closed));
    assert_eq!(opened, Ok(()), "replay of arbitrary payload failed to open");

    let keys = database
        .invoke(|object| object.keys())
        .expect("Store worker is gone");
    for key in keys.into_iter().take(16) {
        let _ = call(|done| database.get(key, done));
    }
    let _ = call(|done| database.get(Key::new(0, 0), done));
}

/// Creates generation 0 under `root` with a binlog holding `payload`.
pub fn write_binlog(root: &std::path::Path, key: &EncryptionKey, payload: &[u8], track_time: bool) {
    let dir = StoreDir::new(root);
    std::fs::create_dir_all(dir.version_dir(0)).expect("Failed to create generation");
    dir.write_version(0).expect("Failed to write version");

    let mut file =
        EncryptedFile::open(&dir.binlog_path(0), Mode::Write, key).expect("Failed to create binlog");
    let header = BinlogHeader {
        format: RecordFormat::new(track_time),
        system_time: 1_700_000_000,
    };
    let mut data = header.to_bytes().to_vec();
    data.extend_from_slice(payload);
    assert!(file.write_with_padding(&data), "Failed to write binlog");
    assert!(file.flush(), "Failed to flush binlog");
}
