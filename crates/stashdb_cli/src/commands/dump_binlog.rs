//! Dump binlog command implementation.

use super::store::open_binlog;
use serde::Serialize;
use stashdb_core::binlog::{BinlogReader, BinlogRecord, StoreRecord, BINLOG_HEADER_SIZE};
use stashdb_core::Settings;
use stashdb_storage::EncryptionKey;
use std::path::Path;

/// Binlog record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Payload offset of the record.
    pub offset: u64,
    /// Record type.
    pub record_type: &'static str,
    /// Encoded size in bytes.
    pub size: usize,
    /// Stored values (store records).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stores: Vec<StoreInfo>,
    /// Keys (remove and access records, hex-encoded).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Estimated relative access time (access records).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

/// One stored value inside a record.
#[derive(Debug, Serialize)]
pub struct StoreInfo {
    /// Key (hex-encoded).
    pub key: String,
    /// Value tag.
    pub tag: u8,
    /// Value size in bytes.
    pub size: u32,
    /// Place id (hex-encoded).
    pub place: String,
    /// CRC-32 of the value.
    pub checksum: u32,
    /// Estimated relative time of the write.
    pub time: u64,
}

impl From<&StoreRecord> for StoreInfo {
    fn from(record: &StoreRecord) -> Self {
        Self {
            key: record.key.to_string(),
            tag: record.tag,
            size: record.size,
            place: record.place.to_string(),
            checksum: record.checksum,
            time: record.time.relative,
        }
    }
}

/// Dump output: the records plus where reading stopped.
#[derive(Debug, Serialize)]
pub struct DumpResult {
    /// Creation time of the binlog (unix seconds).
    pub system_time: u32,
    /// Whether store records carry access times.
    pub track_time: bool,
    /// Dumped records.
    pub records: Vec<RecordInfo>,
    /// Total number of readable records.
    pub total_records: usize,
    /// Payload offset past the last readable record.
    pub valid_till: u64,
    /// Binlog payload size.
    pub size: u64,
}

/// Runs the dump-binlog command.
pub fn run(
    path: &Path,
    key: &EncryptionKey,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = read_records(path, key, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Decodes up to `limit` records of the current binlog.
pub fn read_records(
    path: &Path,
    key: &EncryptionKey,
    limit: Option<usize>,
) -> Result<DumpResult, Box<dyn std::error::Error>> {
    let (mut file, header) = open_binlog(path, key)?;
    let size = file.size();
    let settings = Settings::default();
    let max_records = limit.unwrap_or(usize::MAX);

    let mut records = Vec::new();
    let mut offset = BINLOG_HEADER_SIZE as u64;
    let outcome = BinlogReader::new(
        &mut file,
        header.format,
        settings.max_bundled_records,
        settings.read_block_size,
    )
    .read_till_end(|record| {
        let encoded = record.encoded_size(header.format);
        if records.len() < max_records {
            records.push(describe(offset, encoded, &record));
        }
        offset += encoded as u64;
        true
    });

    Ok(DumpResult {
        system_time: header.system_time,
        track_time: header.format.track_time,
        records,
        total_records: outcome.records,
        valid_till: outcome.valid_till,
        size,
    })
}

fn describe(offset: u64, size: usize, record: &BinlogRecord) -> RecordInfo {
    let mut info = RecordInfo {
        offset,
        record_type: "",
        size,
        stores: Vec::new(),
        keys: Vec::new(),
        time: None,
    };
    match record {
        BinlogRecord::Store(store) => {
            info.record_type = "STORE";
            info.stores.push(store.into());
        }
        BinlogRecord::MultiStore(stores) => {
            info.record_type = "MULTI_STORE";
            info.stores = stores.iter().map(StoreInfo::from).collect();
        }
        BinlogRecord::MultiRemove(keys) => {
            info.record_type = "MULTI_REMOVE";
            info.keys = keys.iter().map(ToString::to_string).collect();
        }
        BinlogRecord::MultiAccess { time, keys } => {
            info.record_type = "MULTI_ACCESS";
            info.keys = keys.iter().map(ToString::to_string).collect();
            info.time = Some(time.relative);
        }
    }
    info
}

fn print_text_output(result: &DumpResult) {
    println!(
        "Binlog created at {} (time tracking: {})",
        result.system_time,
        if result.track_time { "on" } else { "off" }
    );
    println!("{:>10} {:>14} {:>6}  DETAILS", "OFFSET", "TYPE", "SIZE");
    println!("{}", "-".repeat(72));
    for record in &result.records {
        let details = match record.record_type {
            "STORE" | "MULTI_STORE" => record
                .stores
                .iter()
                .map(|store| format!("{} tag={} size={}", store.key, store.tag, store.size))
                .collect::<Vec<_>>()
                .join(", "),
            _ => {
                let time = record.time.map(|t| format!("t={t} ")).unwrap_or_default();
                format!("{time}{} keys", record.keys.len())
            }
        };
        println!(
            "{:>10} {:>14} {:>6}  {}",
            record.offset, record.record_type, record.size, details
        );
    }
    println!();
    println!(
        "Total: {} records, {} of {} bytes readable",
        result.total_records, result.valid_till, result.size
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::{Database, Key, TaggedValue};

    #[test]
    fn dumps_store_and_remove_records() {
        let dir = tempfile::tempdir().unwrap();
        let key = EncryptionKey::generate();
        {
            let database = Database::new(dir.path(), Settings::default()).unwrap();
            let k = key.clone();
            database
                .invoke(move |object| {
                    object.open(k)?;
                    object.put(Key::from(1), TaggedValue::new(vec![1; 5], 3))?;
                    object.put(Key::from(2), TaggedValue::new(vec![2; 5], 0))?;
                    object.remove(Key::from(1))
                })
                .unwrap()
                .unwrap();
        }

        let result = read_records(dir.path(), &key, None).unwrap();
        assert_eq!(result.total_records, 3);
        assert_eq!(result.valid_till, result.size);
        assert_eq!(result.records[0].record_type, "STORE");
        assert_eq!(result.records[0].stores[0].tag, 3);
        assert_eq!(result.records[2].record_type, "MULTI_REMOVE");
        assert_eq!(result.records[1].offset, 16 + 48);

        let limited = read_records(dir.path(), &key, Some(1)).unwrap();
        assert_eq!(limited.records.len(), 1);
        assert_eq!(limited.total_records, 3);
    }
}
