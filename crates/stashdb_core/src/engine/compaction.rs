//! Starting compactions and swapping their output in.

use super::DatabaseObject;
use crate::binlog::{BinlogHeader, EstimatedTimePoint, StoreRecord};
use crate::compactor::{Compactor, CompactorJob};
use crate::error::{CacheResult, Error};
use stashdb_storage::{padded_size, EncryptedFile, EncryptionKey, Mode};
use std::fs;
use std::time::{Duration, Instant};

/// Delay before retrying a failed compaction.
pub const COMPACTOR_RETRY_DELAY: Duration = Duration::from_secs(10);

impl DatabaseObject {
    /// Starts a compaction if enough of the binlog is obsolete.
    pub(super) fn check_compactor(&mut self) {
        if self.compactor.is_some() || !self.is_open() {
            return;
        }
        let after_excess = self.settings.compact_after_excess;
        if after_excess == 0 || self.binlog_excess < after_excess {
            return;
        }
        let full_size = self.settings.compact_after_full_size;
        if full_size > 0 {
            let excess = u128::from(self.binlog_excess) * u128::from(full_size);
            if excess < u128::from(after_excess) * u128::from(self.binlog_size()) {
                return;
            }
        }
        if self
            .compactor_next_attempt
            .is_some_and(|at| Instant::now() < at)
        {
            return;
        }
        self.start_compactor();
    }

    fn start_compactor(&mut self) {
        let Some(key) = self.key.clone() else {
            return;
        };
        let till = self.binlog_size();
        let system = self.time.system;
        let mut records: Vec<StoreRecord> = self
            .map
            .iter()
            .map(|(key, entry)| StoreRecord {
                key: *key,
                tag: entry.tag,
                size: entry.size,
                place: entry.place,
                checksum: entry.checksum,
                time: EstimatedTimePoint::new(entry.use_time, system),
            })
            .collect();
        records.sort_unstable_by_key(|record| record.key);

        tracing::info!(
            entries = records.len(),
            excess = self.binlog_excess,
            size = till,
            "starting compaction"
        );
        let job = CompactorJob {
            path: self.dir.compact_path(self.version),
            key,
            header: BinlogHeader {
                format: self.format,
                system_time: system,
            },
            records,
            chunk_size: self.settings.compact_chunk_size,
        };
        self.compactor = Compactor::start(job, till, self.binlog_excess, self.mailbox.clone());
        if self.compactor.is_none() {
            self.compactor_next_attempt = Some(Instant::now() + COMPACTOR_RETRY_DELAY);
        }
        self.schedule_stats();
    }

    /// Called on the worker thread when the compactor finishes.
    pub fn compactor_done(&mut self, result: CacheResult<()>) {
        let Some(compactor) = self.compactor.take() else {
            return;
        };
        match result.and_then(|()| self.swap_compacted(compactor.till)) {
            Ok(()) => {
                self.binlog_excess = self.binlog_excess.saturating_sub(compactor.excess);
                self.compactor_next_attempt = None;
                tracing::info!(size = self.binlog_size(), "binlog compacted");
            }
            Err(error) => {
                tracing::warn!(%error, "compaction failed");
                let _ = fs::remove_file(self.dir.compact_path(self.version));
                self.compactor_next_attempt = Some(Instant::now() + COMPACTOR_RETRY_DELAY);
            }
        }
        self.schedule_stats();
    }

    /// Appends the binlog tail past `till` to the compacted binlog and
    /// makes it the live one.
    fn swap_compacted(&mut self, till: u64) -> CacheResult<()> {
        let key = self.key.clone().ok_or(Error::Closed)?;
        let compact_path = self.dir.compact_path(self.version);
        let ready_path = self.dir.ready_path(self.version);
        let binlog_path = self.binlog_path();
        let block_size = self.settings.read_block_size;

        {
            let mut compact = EncryptedFile::open(&compact_path, Mode::ReadAppend, &key)
                .map_err(|_| Error::io(&compact_path))?;
            let binlog = self.binlog.as_mut().ok_or(Error::Closed)?;
            if !copy_tail(binlog, till, &mut compact, block_size)
                || !compact.flush()
                || !compact.sync()
            {
                return Err(Error::io(&compact_path));
            }
        }
        fs::rename(&compact_path, &ready_path).map_err(|_| Error::io(&ready_path))?;

        // Closing releases the lock held on the old binlog.
        self.binlog = None;
        if let Err(error) = fs::rename(&ready_path, &binlog_path) {
            tracing::warn!(path = %binlog_path.display(), %error, "failed to replace binlog");
            let _ = fs::remove_file(&ready_path);
            self.reopen_binlog(&key)?;
            return Err(Error::io(binlog_path));
        }
        self.reopen_binlog(&key)
    }

    fn reopen_binlog(&mut self, key: &EncryptionKey) -> CacheResult<()> {
        let path = self.binlog_path();
        match EncryptedFile::open(&path, Mode::ReadAppend, key) {
            Ok(file) => {
                self.binlog = Some(file);
                Ok(())
            }
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "failed to reopen binlog");
                self.close();
                Err(Error::io(path))
            }
        }
    }
}

/// Copies `from[till..]` to the end of `to`, leaving `from` positioned at
/// its end.
fn copy_tail(from: &mut EncryptedFile, till: u64, to: &mut EncryptedFile, block_size: usize) -> bool {
    let end = from.size();
    if till > end {
        return false;
    }
    let mut copied = from.seek(till);
    let mut buffer = vec![0u8; padded_size(block_size.max(16))];
    while copied && from.offset() < end {
        let read = from.read(&mut buffer);
        if read == 0 {
            copied = false;
            break;
        }
        copied = to.write(&mut buffer[..read]) == read;
    }
    from.seek(end) && copied
}
