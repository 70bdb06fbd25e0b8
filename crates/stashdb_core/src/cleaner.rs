//! Background removal of abandoned generations.
//!
//! After a store opens, every numbered generation directory other than
//! the one named by the `version` file is garbage left by `clear()` or a
//! failed open. The cleaner deletes them on its own thread and reports
//! back to the worker queue.

use crate::dir::StoreDir;
use crate::error::{CacheResult, Error};
use crate::guard::BinaryGuard;
use crate::queue::Mailbox;
use std::fs;
use std::thread;

/// Owner-side handle of a running cleaner. Dropping it cancels the work.
#[derive(Debug)]
pub struct Cleaner {
    _guard: BinaryGuard,
}

impl Cleaner {
    /// Starts cleaning `dir` on a new thread.
    ///
    /// The result is posted to `mailbox` as a call to
    /// [`DatabaseObject::cleaner_done`](crate::engine::DatabaseObject::cleaner_done).
    /// Returns `None` if the thread could not be spawned.
    pub fn start(dir: StoreDir, mailbox: Mailbox) -> Option<Self> {
        let (mine, theirs) = BinaryGuard::pair();
        let spawned = thread::Builder::new()
            .name("stashdb-cleaner".into())
            .spawn(move || {
                let result = clean(&dir, &theirs);
                // Checked again on the worker: the owner may have been
                // replaced while the task was queued.
                mailbox.post(move |object| {
                    if theirs.alive() {
                        object.cleaner_done(result);
                    }
                });
            });
        match spawned {
            Ok(_) => Some(Self { _guard: mine }),
            Err(error) => {
                tracing::warn!(%error, "failed to start cleaner");
                None
            }
        }
    }
}

/// Removes every generation but the current one.
///
/// Does nothing if the version file is missing. Returns the first path
/// that could not be removed.
pub fn clean(dir: &StoreDir, guard: &BinaryGuard) -> CacheResult<()> {
    let Some(current) = dir.read_version() else {
        return Ok(());
    };
    let mut first_error = None;
    for version in dir.list_versions() {
        if version == current {
            continue;
        }
        if !guard.alive() || dir.read_version() != Some(current) {
            break;
        }
        let path = dir.version_dir(version);
        match fs::remove_dir_all(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed old generation"),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to remove old generation");
                first_error.get_or_insert_with(|| Error::io(&path));
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
