//! Process-wide registry of open stores, keyed by path.

use crate::config::Settings;
use crate::database::Database;
use crate::error::CacheResult;
use crate::guard::BinaryGuard;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

type Registry = Mutex<HashMap<PathBuf, Kept>>;

struct Kept {
    database: Arc<Database>,
    handles: usize,
    /// Set while the store waits for its cleaner before being forgotten.
    /// Dropping it cancels the teardown.
    destroying: Option<BinaryGuard>,
}

/// Hands out one shared [`Database`] per path.
///
/// When the last [`DatabasePointer`] for a path is dropped, the store
/// waits for its cleaner, then closes and is forgotten. Asking for the
/// same path in the meantime revives the existing store instead of racing
/// a second instance against the pending teardown.
#[derive(Clone, Default)]
pub struct Databases {
    inner: Arc<Registry>,
}

impl Databases {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store at `path`, creating it with `settings` if needed.
    ///
    /// A store revived from a pending teardown keeps its state; `settings`
    /// are applied through [`Database::reconfigure`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if a new store's worker
    /// cannot be started.
    pub fn get(&self, path: impl Into<PathBuf>, settings: Settings) -> CacheResult<DatabasePointer> {
        let path = path.into();
        let mut registry = self.inner.lock();
        let database = if let Some(kept) = registry.get_mut(&path) {
            if kept.destroying.take().is_some() {
                tracing::debug!(path = %path.display(), "reviving store");
                kept.database.reconfigure(settings);
            }
            kept.handles += 1;
            Arc::clone(&kept.database)
        } else {
            let database = Arc::new(Database::new(path.clone(), settings)?);
            registry.insert(
                path.clone(),
                Kept {
                    database: Arc::clone(&database),
                    handles: 1,
                    destroying: None,
                },
            );
            database
        };
        Ok(DatabasePointer {
            database,
            path,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Returns true if `path` is registered, including pending teardowns.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().contains_key(path)
    }
}

impl std::fmt::Debug for Databases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Databases")
            .field("stores", &self.inner.lock().len())
            .finish()
    }
}

/// Shared handle to a registered [`Database`].
pub struct DatabasePointer {
    database: Arc<Database>,
    path: PathBuf,
    registry: Weak<Registry>,
}

impl Deref for DatabasePointer {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.database
    }
}

impl Clone for DatabasePointer {
    fn clone(&self) -> Self {
        if let Some(registry) = self.registry.upgrade() {
            if let Some(kept) = registry.lock().get_mut(&self.path) {
                kept.handles += 1;
            }
        }
        Self {
            database: Arc::clone(&self.database),
            path: self.path.clone(),
            registry: Weak::clone(&self.registry),
        }
    }
}

impl Drop for DatabasePointer {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut kept_stores = registry.lock();
        let Some(kept) = kept_stores.get_mut(&self.path) else {
            return;
        };
        kept.handles = kept.handles.saturating_sub(1);
        if kept.handles > 0 {
            return;
        }
        let (mine, theirs) = BinaryGuard::pair();
        kept.destroying = Some(mine);

        let weak = Weak::clone(&self.registry);
        let path = self.path.clone();
        self.database.post(move |object| {
            object.wait_for_cleaner(Box::new(move |object| {
                let Some(registry) = weak.upgrade() else {
                    object.close();
                    return;
                };
                let mut kept_stores = registry.lock();
                if !theirs.alive() {
                    return;
                }
                object.close();
                // The removed entry may hold the last `Arc<Database>`; its
                // drop detects that it runs on the worker and does not join.
                kept_stores.remove(&path);
                tracing::debug!(path = %path.display(), "store forgotten");
            }));
        });
    }
}

impl std::fmt::Debug for DatabasePointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePointer")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Key;
    use stashdb_storage::EncryptionKey;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn same_path_shares_one_store() {
        let dir = tempdir().unwrap();
        let databases = Databases::new();
        let first = databases.get(dir.path(), Settings::default()).unwrap();
        let second = databases.get(dir.path(), Settings::default()).unwrap();
        assert!(std::ptr::eq(&*first, &*second));
    }

    #[test]
    fn last_handle_forgets_path() {
        let dir = tempdir().unwrap();
        let databases = Databases::new();
        let pointer = databases.get(dir.path(), Settings::default()).unwrap();
        pointer.open(EncryptionKey::generate(), |result| assert!(result.is_ok()));
        let copy = pointer.clone();
        drop(pointer);
        assert!(databases.contains(dir.path()));

        drop(copy);
        assert!(wait_until(|| !databases.contains(dir.path())));
    }

    #[test]
    fn reviving_keeps_the_store_open() {
        let dir = tempdir().unwrap();
        let databases = Databases::new();
        let pointer = databases.get(dir.path(), Settings::default()).unwrap();
        pointer.open(EncryptionKey::generate(), |result| assert!(result.is_ok()));

        // Holding the worker keeps the teardown task queued behind it.
        let (release, blocked) = mpsc::channel::<()>();
        pointer.post(move |_| {
            let _ = blocked.recv_timeout(Duration::from_secs(10));
        });
        drop(pointer);
        let revived = databases.get(dir.path(), Settings::default()).unwrap();
        release.send(()).unwrap();

        let (tx, rx) = mpsc::channel();
        revived.put(Key::from(1), vec![1, 2, 3], move |result| tx.send(result).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Ok(()));
        assert!(databases.contains(dir.path()));
    }

    #[test]
    fn store_reopens_after_teardown() {
        let dir = tempdir().unwrap();
        let key = EncryptionKey::generate();
        let databases = Databases::new();
        {
            let pointer = databases.get(dir.path(), Settings::default()).unwrap();
            pointer.open(key.clone(), |result| assert!(result.is_ok()));
            pointer.put(Key::from(1), b"kept".to_vec(), |result| assert!(result.is_ok()));
        }
        assert!(wait_until(|| !databases.contains(dir.path())));

        let pointer = databases.get(dir.path(), Settings::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        pointer.open(key, move |result| tx.send(result).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Ok(()));
        let bytes = pointer.invoke(|object| object.get(Key::from(1)).bytes).unwrap();
        assert_eq!(bytes, b"kept");
    }
}
