//! Streaming binlog reader.
//!
//! Reads the binlog in blocks of `read_block_size` bytes and hands every
//! complete record to a handler, so replay memory stays bounded regardless
//! of binlog size. A bundle larger than the block grows the buffer to fit.

use super::record::{read_record_size, BinlogRecord, RecordFormat, RecordSize};
use stashdb_storage::EncryptedFile;

/// Where and why replay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Number of records accepted by the handler.
    pub records: usize,
    /// Payload offset just past the last accepted record.
    pub valid_till: u64,
    /// True if the whole file was consumed without a bad or torn record.
    pub complete: bool,
}

/// A streaming reader over the records of an open binlog.
///
/// Reading starts at the file's current offset, i.e. just after the
/// binlog header.
pub struct BinlogReader<'a> {
    file: &'a mut EncryptedFile,
    format: RecordFormat,
    max_bundled: usize,
    buffer: Vec<u8>,
    /// Start of the unparsed bytes in `buffer`.
    start: usize,
    /// End of the valid bytes in `buffer`.
    end: usize,
    valid_till: u64,
}

impl<'a> BinlogReader<'a> {
    /// Creates a reader.
    ///
    /// `block_size` is rounded up to a whole number of cipher blocks.
    pub fn new(
        file: &'a mut EncryptedFile,
        format: RecordFormat,
        max_bundled: usize,
        block_size: usize,
    ) -> Self {
        let valid_till = file.offset();
        let block_size = stashdb_storage::padded_size(block_size.max(64));
        Self {
            file,
            format,
            max_bundled,
            buffer: vec![0u8; block_size],
            start: 0,
            end: 0,
            valid_till,
        }
    }

    /// Feeds every record to `handler` until the end of the file, the first
    /// malformed record, or the first record the handler rejects.
    ///
    /// The file position afterwards is unspecified; callers seek or truncate
    /// to [`ReadOutcome::valid_till`].
    pub fn read_till_end<F>(mut self, mut handler: F) -> ReadOutcome
    where
        F: FnMut(BinlogRecord) -> bool,
    {
        let mut records = 0;
        loop {
            loop {
                let available = &self.buffer[self.start..self.end];
                let size = match read_record_size(available, self.format, self.max_bundled) {
                    RecordSize::Unknown => break,
                    RecordSize::Invalid => return self.stop(records),
                    RecordSize::Size(size) => size,
                };
                if size > available.len() {
                    if size > self.buffer.len() {
                        self.buffer.resize(size, 0);
                    }
                    break;
                }
                let accepted = BinlogRecord::decode(&available[..size], self.format)
                    .is_some_and(&mut handler);
                if !accepted {
                    return self.stop(records);
                }
                self.start += size;
                self.valid_till += size as u64;
                records += 1;
            }
            if !self.refill() {
                let complete = self.start == self.end;
                return ReadOutcome {
                    records,
                    valid_till: self.valid_till,
                    complete,
                };
            }
        }
    }

    fn stop(&self, records: usize) -> ReadOutcome {
        tracing::warn!(
            path = %self.file.path().display(),
            offset = self.valid_till,
            "binlog replay stopped at a bad record"
        );
        ReadOutcome {
            records,
            valid_till: self.valid_till,
            complete: false,
        }
    }

    /// Moves leftover bytes to the front and reads more. Returns false at
    /// end of file.
    fn refill(&mut self) -> bool {
        if self.start > 0 {
            self.buffer.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buffer.len() {
            return false;
        }
        let read = self.file.read(&mut self.buffer[self.end..]);
        self.end += read;
        read > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::{EstimatedTimePoint, StoreRecord};
    use crate::types::{Key, PlaceId};
    use proptest::prelude::*;
    use stashdb_storage::{EncryptionKey, Mode};
    use tempfile::tempdir;

    const FORMAT: RecordFormat = RecordFormat::new(true);

    fn store(n: u64) -> BinlogRecord {
        BinlogRecord::Store(StoreRecord {
            key: Key::new(0, n),
            tag: 0,
            size: 1,
            place: PlaceId([n as u8; 7]),
            checksum: 0,
            time: EstimatedTimePoint::new(n, 1),
        })
    }

    fn write_records(file: &mut EncryptedFile, records: &[BinlogRecord]) {
        for record in records {
            let mut bytes = record.encode(FORMAT);
            assert_eq!(file.write(&mut bytes), bytes.len());
        }
        file.flush();
    }

    fn collect(file: &mut EncryptedFile, block: usize) -> (Vec<BinlogRecord>, ReadOutcome) {
        file.seek(0);
        let mut seen = Vec::new();
        let outcome = BinlogReader::new(file, FORMAT, 64, block).read_till_end(|record| {
            seen.push(record);
            true
        });
        (seen, outcome)
    }

    #[test]
    fn reads_all_records_across_blocks() {
        let dir = tempdir().unwrap();
        let key = EncryptionKey::generate();
        let mut file = EncryptedFile::open(&dir.path().join("binlog"), Mode::Write, &key).unwrap();

        let mut records: Vec<_> = (0..20).map(store).collect();
        records.push(BinlogRecord::MultiRemove((0..10).map(|n| Key::new(0, n)).collect()));
        write_records(&mut file, &records);

        let (seen, outcome) = collect(&mut file, 64);
        assert_eq!(seen, records);
        assert!(outcome.complete);
        assert_eq!(outcome.records, 21);
        assert_eq!(outcome.valid_till, file.size());
    }

    #[test]
    fn grows_buffer_for_large_bundles() {
        let dir = tempdir().unwrap();
        let key = EncryptionKey::generate();
        let mut file = EncryptedFile::open(&dir.path().join("binlog"), Mode::Write, &key).unwrap();

        let bundle = BinlogRecord::MultiAccess {
            time: EstimatedTimePoint::new(1, 1),
            keys: (0..40).map(|n| Key::new(n, n)).collect(),
        };
        write_records(&mut file, &[store(1), bundle.clone(), store(2)]);

        let (seen, outcome) = collect(&mut file, 64);
        assert_eq!(seen, vec![store(1), bundle, store(2)]);
        assert!(outcome.complete);
    }

    #[test]
    fn stops_at_torn_tail() {
        let dir = tempdir().unwrap();
        let key = EncryptionKey::generate();
        let path = dir.path().join("binlog");
        let mut file = EncryptedFile::open(&path, Mode::Write, &key).unwrap();
        let bundle = BinlogRecord::MultiRemove((0..4).map(|n| Key::new(0, n)).collect());
        write_records(&mut file, &[store(1), bundle]);
        let good = FORMAT.store_size() as u64;
        file.truncate(good + 32);

        let (seen, outcome) = collect(&mut file, 4096);
        assert_eq!(seen, vec![store(1)]);
        assert!(!outcome.complete);
        assert_eq!(outcome.valid_till, good);
    }

    #[test]
    fn stops_where_handler_rejects() {
        let dir = tempdir().unwrap();
        let key = EncryptionKey::generate();
        let mut file = EncryptedFile::open(&dir.path().join("binlog"), Mode::Write, &key).unwrap();
        write_records(&mut file, &[store(1), store(2), store(3)]);

        file.seek(0);
        let outcome = BinlogReader::new(&mut file, FORMAT, 64, 4096).read_till_end(|record| {
            !matches!(record, BinlogRecord::Store(s) if s.key == Key::new(0, 2))
        });
        assert_eq!(outcome.records, 1);
        assert_eq!(outcome.valid_till, FORMAT.store_size() as u64);
        assert!(!outcome.complete);
    }

    #[test]
    fn empty_binlog_is_complete() {
        let dir = tempdir().unwrap();
        let key = EncryptionKey::generate();
        let mut file = EncryptedFile::open(&dir.path().join("binlog"), Mode::Write, &key).unwrap();
        let (seen, outcome) = collect(&mut file, 64);
        assert!(seen.is_empty());
        assert!(outcome.complete);
        assert_eq!(outcome.valid_till, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn truncation_keeps_whole_records(
            bundles in prop::collection::vec(1usize..48, 1..12),
            cut_fraction in 0.0f64..=1.0,
            block in 64usize..512,
        ) {
            let dir = tempdir().unwrap();
            let key = EncryptionKey::generate();
            let mut file =
                EncryptedFile::open(&dir.path().join("binlog"), Mode::Write, &key).unwrap();
            let records: Vec<_> = bundles
                .iter()
                .enumerate()
                .map(|(i, &count)| {
                    if i % 2 == 0 {
                        store(i as u64)
                    } else {
                        BinlogRecord::MultiRemove((0..count as u64).map(|n| Key::new(1, n)).collect())
                    }
                })
                .collect();
            write_records(&mut file, &records);

            let cut = (file.size() as f64 * cut_fraction) as u64;
            file.truncate(cut);
            let cut = file.size();

            let mut end = 0u64;
            let expected: Vec<_> = records
                .iter()
                .take_while(|record| {
                    end += record.encoded_size(FORMAT) as u64;
                    end <= cut
                })
                .cloned()
                .collect();
            let expected_till: u64 = expected.iter().map(|r| r.encoded_size(FORMAT) as u64).sum();

            let (seen, outcome) = collect(&mut file, block);
            prop_assert_eq!(outcome.valid_till, expected_till);
            prop_assert_eq!(outcome.complete, expected_till == cut);
            prop_assert_eq!(seen, expected);
        }
    }
}
