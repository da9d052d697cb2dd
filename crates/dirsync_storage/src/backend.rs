//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store underneath one journal file.
///
/// Backends are opaque: they know nothing about index entries, tags or
/// records. The journal layers its format on top.
///
/// # Invariants
///
/// - `append` returns the offset where data was written, which is the size
///   before the call
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` never changes the size
/// - Backends must be `Send + Sync` so a directory can be shared across tasks
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites bytes that already exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::WritePastEnd`] if the range would
    /// extend the store, or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Makes all written data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the store back to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_size` is
    /// larger than the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
