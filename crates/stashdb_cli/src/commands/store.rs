//! Opening a store for maintenance.

use stashdb_core::binlog::{BinlogHeader, RecordFormat, BINLOG_HEADER_SIZE};
use stashdb_core::dir::StoreDir;
use stashdb_core::{Database, Settings};
use stashdb_storage::{EncryptedFile, EncryptionKey, Mode};
use std::path::Path;

/// Opens the binlog of the current generation read-only and returns it
/// positioned after its header.
pub fn open_binlog(
    root: &Path,
    key: &EncryptionKey,
) -> Result<(EncryptedFile, BinlogHeader), Box<dyn std::error::Error>> {
    let dir = StoreDir::new(root);
    let version = dir
        .read_version()
        .ok_or_else(|| format!("No store found at {}", root.display()))?;
    let path = dir.binlog_path(version);
    let mut file = EncryptedFile::open(&path, Mode::Read, key)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    let mut bytes = [0u8; BINLOG_HEADER_SIZE];
    if file.read(&mut bytes) != BINLOG_HEADER_SIZE {
        return Err(format!("Binlog {} has no header", path.display()).into());
    }
    let header = BinlogHeader::from_bytes(&bytes)
        .ok_or_else(|| format!("Binlog {} has an unknown format", path.display()))?;
    Ok((file, header))
}

/// Settings that never evict, compact or replace the store on their own.
pub fn maintenance_settings(format: RecordFormat) -> Settings {
    Settings::default()
        .track_estimated_time(format.track_time)
        .total_size_limit(0)
        .total_time_limit(0)
        .compact_after_excess(0)
}

/// Opens the store at `root`, matching the format of its binlog so that
/// opening never starts a new generation.
pub fn open(root: &Path, key: EncryptionKey) -> Result<Database, Box<dyn std::error::Error>> {
    let format = match open_binlog(root, &key) {
        Ok((_, header)) => header.format,
        Err(e) => {
            tracing::debug!(error = %e, "no readable binlog, creating a store");
            RecordFormat::new(true)
        }
    };
    let database = Database::new(root, maintenance_settings(format))?;
    database.invoke(move |object| object.open(key))??;
    Ok(database)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_keeps_untimed_format() {
        let dir = tempfile::tempdir().unwrap();
        let key = EncryptionKey::generate();
        {
            let settings = Settings::default().track_estimated_time(false);
            let database = Database::new(dir.path(), settings).unwrap();
            let k = key.clone();
            database.invoke(move |object| object.open(k)).unwrap().unwrap();
        }

        let database = open(dir.path(), key.clone()).unwrap();
        let version = database.invoke(|object| object.version()).unwrap();
        assert_eq!(version, 0);
        drop(database);

        let (_, header) = open_binlog(dir.path(), &key).unwrap();
        assert!(!header.format.track_time);
    }

    #[test]
    fn missing_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_binlog(dir.path(), &EncryptionKey::generate()).is_err());
    }
}
