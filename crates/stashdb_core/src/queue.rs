//! Work queue of a store's worker thread.

use crate::engine::DatabaseObject;
use std::sync::mpsc::Sender;

/// A unit of work executed on the worker thread with exclusive access to
/// the engine.
pub type Task = Box<dyn FnOnce(&mut DatabaseObject) + Send>;

/// Messages understood by the worker loop.
pub(crate) enum Command {
    /// Run a task.
    Task(Task),
    /// Close the store and exit the loop.
    Shutdown,
}

/// Handle for posting tasks to a worker thread.
///
/// Background helpers hold a clone to report their results back.
#[derive(Clone)]
pub struct Mailbox {
    sender: Sender<Command>,
}

impl Mailbox {
    pub(crate) fn new(sender: Sender<Command>) -> Self {
        Self { sender }
    }

    /// Queues a task. Returns false if the worker is gone.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut DatabaseObject) + Send + 'static,
    {
        self.sender.send(Command::Task(Box::new(task))).is_ok()
    }

    pub(crate) fn shutdown(&self) -> bool {
        self.sender.send(Command::Shutdown).is_ok()
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox").finish_non_exhaustive()
    }
}
