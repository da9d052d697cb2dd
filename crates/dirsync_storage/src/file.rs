//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal file on disk.
///
/// The file handle and the cached size live behind one lock so a read never
/// observes a size that the handle has not caught up with.
///
/// # Durability
///
/// - `flush()` hands buffered data to the OS
/// - `sync()` calls `File::sync_data()`, which is what an append-only file
///   needs (the size change is part of the data)
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens an existing file, or creates it when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Creates a new file, failing if one already exists at `path`.
    ///
    /// Segment rotation uses this so two writers can never share a segment.
    ///
    /// # Errors
    ///
    /// Returns an I/O error of kind `AlreadyExists` if the file exists.
    pub fn create_new(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size }),
        })
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.inner.lock();
        let size = state.size;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let mut buf = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = self.inner.get_mut();
        let offset = state.size;
        if data.is_empty() {
            return Ok(offset);
        }
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.size += data.len() as u64;
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let state = self.inner.get_mut();
        let size = state.size;
        if offset.saturating_add(data.len() as u64) > size {
            return Err(StorageError::WritePastEnd {
                offset,
                len: data.len(),
                size,
            });
        }
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let state = self.inner.get_mut();
        if new_size > state.size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: state.size,
            });
        }
        state.file.set_len(new_size)?;
        state.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_returns_previous_size() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.log")).unwrap();

        assert_eq!(backend.append(b"+abc").unwrap(), 0);
        assert_eq!(backend.append(b"-de").unwrap(), 4);
        assert_eq!(backend.size().unwrap(), 7);
        assert_eq!(backend.read_at(4, 3).unwrap(), b"-de");
    }

    #[test]
    fn write_at_overwrites_in_place() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.log")).unwrap();
        backend.append(b"+first+second").unwrap();

        backend.write_at(6, b"x").unwrap();

        assert_eq!(backend.read_at(0, 13).unwrap(), b"+firstxsecond");
        assert_eq!(backend.size().unwrap(), 13);
    }

    #[test]
    fn write_at_cannot_extend() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.log")).unwrap();
        backend.append(b"ab").unwrap();

        let result = backend.write_at(1, b"xyz");
        assert!(matches!(result, Err(StorageError::WritePastEnd { .. })));
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.log")).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn truncate_rolls_back_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.idx");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(&[1; 8]).unwrap();
            backend.append(&[2; 8]).unwrap();
            backend.truncate(8).unwrap();
            assert!(matches!(
                backend.truncate(9),
                Err(StorageError::TruncateBeyondEnd { .. })
            ));
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(backend.read_at(0, 8).unwrap(), vec![1; 8]);
    }

    #[test]
    fn create_new_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("00000000000000000001.idx");

        let backend = FileBackend::create_new(&path).unwrap();
        assert_eq!(backend.path(), path);

        let err = FileBackend::create_new(&path).unwrap_err();
        match err {
            StorageError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.flush().unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_at(0, 7).unwrap(), b"durable");
    }
}
