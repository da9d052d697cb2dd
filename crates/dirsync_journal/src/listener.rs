//! Change listeners.
//!
//! A directory calls every registered listener after each committed append,
//! outside its lock. Listeners must be cheap and non-blocking; the push
//! engine's listener only wakes a task.

use crate::types::{DirectoryId, Version};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives a callback for every committed append.
pub trait ChangeListener: Send + Sync {
    /// Called once per appended version, in commit order.
    fn on_append(&self, directory: DirectoryId, version: Version);

    /// Called once when the directory handle is closed. No append follows.
    fn on_close(&self, _directory: DirectoryId) {}
}

/// Handle returned by registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Arc<dyn ChangeListener>)>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn notify(&self, directory: DirectoryId, version: Version) {
        for listener in self.snapshot() {
            listener.on_append(directory, version);
        }
    }

    pub(crate) fn notify_closed(&self, directory: DirectoryId) {
        for listener in self.snapshot() {
            listener.on_close(directory);
        }
    }

    /// Copies the list so a listener may deregister itself from a callback.
    fn snapshot(&self) -> Vec<Arc<dyn ChangeListener>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }
}
