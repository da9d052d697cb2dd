//! In-memory storage backend for tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory byte store.
///
/// Clones share the same bytes, which lets a test keep a handle on a
/// segment file after handing the backend to the journal and then inspect or
/// damage it.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if offset.saturating_add(bytes.len() as u64) > size {
            return Err(StorageError::WritePastEnd {
                offset,
                len: bytes.len(),
                size,
            });
        }
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
