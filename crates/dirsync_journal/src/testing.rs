//! Fault injection for unit tests.

use dirsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Switches shared between a test and the backend it handed to a segment.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub(crate) append: AtomicBool,
    pub(crate) write_at: AtomicBool,
    pub(crate) truncate: AtomicBool,
}

fn injected(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, format!("injected {what} failure")))
}

/// An in-memory backend whose operations fail on demand.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultyBackend {
    pub(crate) inner: InMemoryBackend,
    pub(crate) faults: Arc<Faults>,
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.faults.append.load(Ordering::SeqCst) {
            return Err(injected("append"));
        }
        self.inner.append(data)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if self.faults.write_at.load(Ordering::SeqCst) {
            return Err(injected("write"));
        }
        self.inner.write_at(offset, data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.faults.truncate.load(Ordering::SeqCst) {
            return Err(injected("truncate"));
        }
        self.inner.truncate(new_size)
    }
}
