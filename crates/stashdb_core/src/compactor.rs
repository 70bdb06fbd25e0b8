//! Background binlog compaction.
//!
//! The compactor writes `binlog-compact`: a binlog header followed by
//! `MultiStore` bundles holding exactly one record per live key, in
//! ascending key order. The worker then appends whatever the live binlog
//! gained since the snapshot and swaps the files.

use crate::binlog::{BinlogHeader, BinlogRecord, StoreRecord};
use crate::error::{CacheResult, Error};
use crate::guard::BinaryGuard;
use crate::queue::Mailbox;
use stashdb_storage::{EncryptedFile, EncryptionKey, Mode};
use std::path::PathBuf;
use std::thread;

/// Everything the compactor needs, captured on the worker thread.
#[derive(Debug)]
pub struct CompactorJob {
    /// Output path (`binlog-compact`).
    pub path: PathBuf,
    /// Store key.
    pub key: EncryptionKey,
    /// Header of the new binlog.
    pub header: BinlogHeader,
    /// Live entries sorted by key.
    pub records: Vec<StoreRecord>,
    /// Parts per `MultiStore` bundle.
    pub chunk_size: usize,
}

/// Owner-side handle of a running compaction. Dropping it cancels the work.
#[derive(Debug)]
pub struct Compactor {
    _guard: BinaryGuard,
    /// Binlog length covered by the snapshot.
    pub till: u64,
    /// Binlog excess at the time of the snapshot.
    pub excess: u64,
}

impl Compactor {
    /// Starts `job` on a new thread.
    ///
    /// The result is posted to `mailbox` as a call to
    /// [`DatabaseObject::compactor_done`](crate::engine::DatabaseObject::compactor_done).
    /// Returns `None` if the thread could not be spawned.
    pub fn start(job: CompactorJob, till: u64, excess: u64, mailbox: Mailbox) -> Option<Self> {
        let (mine, theirs) = BinaryGuard::pair();
        let spawned = thread::Builder::new()
            .name("stashdb-compactor".into())
            .spawn(move || {
                let result = write_compacted(&job, &theirs);
                // Checked again on the worker: the owner may have been
                // replaced while the task was queued.
                mailbox.post(move |object| {
                    if theirs.alive() {
                        object.compactor_done(result);
                    }
                });
            });
        match spawned {
            Ok(_) => Some(Self {
                _guard: mine,
                till,
                excess,
            }),
            Err(error) => {
                tracing::warn!(%error, "failed to start compactor");
                None
            }
        }
    }
}

/// Writes the compacted binlog described by `job`.
///
/// # Errors
///
/// Returns [`Error::Io`] with the output path if anything fails, or if the
/// owner went away midway.
pub fn write_compacted(job: &CompactorJob, guard: &BinaryGuard) -> CacheResult<()> {
    let failed = || Error::io(&job.path);
    let mut file = EncryptedFile::open(&job.path, Mode::Write, &job.key).map_err(|error| {
        tracing::warn!(path = %job.path.display(), %error, "failed to create compacted binlog");
        failed()
    })?;

    let mut header = job.header.to_bytes();
    if file.write(&mut header) != header.len() {
        return Err(failed());
    }
    for chunk in job.records.chunks(job.chunk_size.max(1)) {
        if !guard.alive() {
            return Err(failed());
        }
        let mut bytes = BinlogRecord::MultiStore(chunk.to_vec()).encode(job.header.format);
        if file.write(&mut bytes) != bytes.len() {
            return Err(failed());
        }
    }
    if !file.flush() || !file.sync() {
        return Err(failed());
    }
    tracing::debug!(
        path = %job.path.display(),
        records = job.records.len(),
        bytes = file.size(),
        "compacted binlog written"
    );
    Ok(())
}
