//! Thread-safe façade over a [`DatabaseObject`].

use crate::binlog::{system_clock, Clock};
use crate::config::{Settings, SettingsUpdate};
use crate::engine::DatabaseObject;
use crate::error::{CacheResult, Error};
use crate::queue::{Command, Mailbox};
use crate::stats::Stats;
use crate::types::{Key, TaggedValue};
use stashdb_storage::EncryptionKey;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Handle to one cache store.
///
/// Every call is queued to a dedicated worker thread that owns the store,
/// so calls from any number of threads execute one at a time in the order
/// they were made. Results are delivered through the `done` callback,
/// which runs on the worker thread.
///
/// If the worker thread has died, callbacks are dropped without being
/// called.
///
/// # Example
///
/// ```rust,ignore
/// use stashdb_core::{Database, Key, Settings};
/// use stashdb_storage::EncryptionKey;
///
/// let db = Database::new("cache", Settings::default())?;
/// db.open(EncryptionKey::generate(), |result| assert!(result.is_ok()));
/// db.put(Key::from(1), b"ABC".to_vec(), |result| assert!(result.is_ok()));
/// db.get(Key::from(1), |bytes| assert_eq!(bytes, b"ABC"));
/// ```
pub struct Database {
    path: PathBuf,
    mailbox: Mailbox,
    worker: Option<JoinHandle<()>>,
}

impl Database {
    /// Creates a closed store rooted at `path` and starts its worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the worker thread cannot be spawned.
    pub fn new(path: impl Into<PathBuf>, settings: Settings) -> CacheResult<Self> {
        Self::with_clock(path, settings, system_clock())
    }

    /// Like [`new`](Self::new), reading wall time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the worker thread cannot be spawned.
    pub fn with_clock(
        path: impl Into<PathBuf>,
        settings: Settings,
        clock: Clock,
    ) -> CacheResult<Self> {
        let path = path.into();
        let (sender, receiver) = mpsc::channel();
        let mailbox = Mailbox::new(sender);
        let object = DatabaseObject::new(path.clone(), settings, mailbox.clone(), clock);
        let worker = thread::Builder::new()
            .name("stashdb-worker".into())
            .spawn(move || run(object, receiver))
            .map_err(|error| {
                tracing::error!(path = %path.display(), %error, "failed to start worker");
                Error::io(&path)
            })?;
        Ok(Self {
            path,
            mailbox,
            worker: Some(worker),
        })
    }

    /// Returns the store root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the settings used by the next [`open`](Self::open).
    ///
    /// An open store only picks up the size and time limits.
    pub fn reconfigure(&self, settings: Settings) {
        self.post(move |object| object.reconfigure(settings));
    }

    /// Changes the size and time limits, re-evaluating pruning.
    pub fn update_settings(&self, update: SettingsUpdate) {
        self.post(move |object| object.update_settings(update));
    }

    /// Opens the store with `key`.
    pub fn open<F>(&self, key: EncryptionKey, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.post(move |object| done(object.open(key)));
    }

    /// Flushes pending bundles and closes the store.
    pub fn close<F>(&self, done: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(move |object| {
            object.close();
            done();
        });
    }

    /// Stores `bytes` under `key` with tag 0.
    pub fn put<F>(&self, key: Key, bytes: Vec<u8>, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.put_tagged(key, TaggedValue::new(bytes, 0), done);
    }

    /// Stores `value` under `key`.
    pub fn put_tagged<F>(&self, key: Key, value: TaggedValue, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.post(move |object| done(object.put(key, value)));
    }

    /// Reads the bytes of `key`. Empty bytes mean "not found".
    pub fn get<F>(&self, key: Key, done: F)
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        self.post(move |object| done(object.get(key).bytes));
    }

    /// Reads the value of `key` together with its tag.
    pub fn get_with_tag<F>(&self, key: Key, done: F)
    where
        F: FnOnce(TaggedValue) + Send + 'static,
    {
        self.post(move |object| done(object.get(key)));
    }

    /// Reads `key` and the stored sizes of `keys` in one queue turn.
    pub fn get_with_sizes<F>(&self, key: Key, keys: Vec<Key>, done: F)
    where
        F: FnOnce(Vec<u8>, Vec<Option<u32>>) + Send + 'static,
    {
        self.post(move |object| {
            let (value, sizes) = object.get_with_sizes(key, &keys);
            done(value.bytes, sizes);
        });
    }

    /// Removes `key`.
    pub fn remove<F>(&self, key: Key, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.post(move |object| done(object.remove(key)));
    }

    /// Stores `value` unless `key` already has a value.
    pub fn put_if_empty<F>(&self, key: Key, value: TaggedValue, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.post(move |object| done(object.put_if_empty(key, value)));
    }

    /// Copies the value of `from` to `to` unless `to` already has one.
    pub fn copy_if_empty<F>(&self, from: Key, to: Key, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.post(move |object| done(object.copy_if_empty(from, to)));
    }

    /// Moves the value of `from` to `to` unless `to` already has one.
    pub fn move_if_empty<F>(&self, from: Key, to: Key, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.post(move |object| done(object.move_if_empty(from, to)));
    }

    /// Drops every value by switching to a new generation.
    pub fn clear<F>(&self, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.post(move |object| done(object.clear()));
    }

    /// Drops every value with `tag`.
    pub fn clear_by_tag<F>(&self, tag: u8, done: F)
    where
        F: FnOnce(CacheResult<()>) + Send + 'static,
    {
        self.post(move |object| done(object.clear_by_tag(tag)));
    }

    /// Writes pending remove and access bundles to disk.
    pub fn sync<F>(&self, done: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(move |object| {
            object.sync();
            done();
        });
    }

    /// Completes once pending stale removals are done and no cleaner runs.
    pub fn wait_for_cleaner<F>(&self, done: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(move |object| object.wait_for_cleaner(Box::new(move |_| done())));
    }

    /// Subscribes to statistics.
    ///
    /// The current totals arrive first, followed by throttled updates
    /// whenever they change. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn stats(&self) -> Receiver<Stats> {
        let (sender, receiver) = mpsc::channel();
        self.post(move |object| object.subscribe_stats(sender));
        receiver
    }

    /// Runs `task` on the worker and blocks until it returns.
    ///
    /// Must not be called from the worker thread itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the worker is gone.
    pub fn invoke<R, F>(&self, task: F) -> CacheResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut DatabaseObject) -> R + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        self.post(move |object| {
            let _ = sender.send(task(object));
        });
        receiver.recv().map_err(|_| Error::Closed)
    }

    pub(crate) fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut DatabaseObject) + Send + 'static,
    {
        let posted = self.mailbox.post(task);
        if !posted {
            tracing::warn!(path = %self.path.display(), "store worker is gone");
        }
        posted
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.mailbox.shutdown();
        let Some(worker) = self.worker.take() else {
            return;
        };
        // The last handle may be released by a task on the worker itself.
        if worker.thread().id() != thread::current().id() && worker.join().is_err() {
            tracing::error!(path = %self.path.display(), "store worker panicked");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Worker loop: fires due timers, then waits for the next command or the
/// next deadline, whichever comes first.
fn run(mut object: DatabaseObject, receiver: Receiver<Command>) {
    loop {
        object.fire_timers(Instant::now());
        let command = match object.next_deadline() {
            Some(at) => {
                match receiver.recv_timeout(at.saturating_duration_since(Instant::now())) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };
        match command {
            Command::Task(task) => task(&mut object),
            Command::Shutdown => break,
        }
    }
    object.close();
}
