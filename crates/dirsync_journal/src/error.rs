//! Error types for the journal.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] dirsync_storage::StorageError),

    /// Record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] dirsync_codec::CodecError),

    /// I/O error outside a storage backend (directory scans, lock files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The directory does not exist and creation was not requested.
    #[error("directory not found: {name}")]
    NotFound {
        /// Name or path that was looked up.
        name: String,
    },

    /// Segments overlap, leave a gap, or do not start at version 1.
    #[error("journal inconsistent: {message}")]
    Consistency {
        /// Description of the inconsistency.
        message: String,
    },

    /// Segment content cannot be interpreted.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// The version is 0 or beyond the last committed version.
    #[error("version {version} out of range (last committed is {last})")]
    VersionOutOfRange {
        /// Requested version.
        version: u64,
        /// Last committed version.
        last: u64,
    },

    /// The patch was already removed in place.
    #[error("version {version} is already removed")]
    AlreadyRemoved {
        /// The version.
        version: u64,
    },

    /// Only Add patches can be removed.
    #[error("version {version} is not an add patch")]
    NotAnAdd {
        /// The version.
        version: u64,
    },

    /// No live record matches a removal request.
    #[error("no live record matches {what}")]
    RecordNotFound {
        /// What was searched for.
        what: String,
    },

    /// Another process holds the directory's writer lock.
    #[error("directory locked by another writer: {}", path.display())]
    DirectoryLocked {
        /// The directory path.
        path: PathBuf,
    },

    /// The handle was closed after a failure; look the directory up again.
    #[error("directory handle closed: {}", path.display())]
    Closed {
        /// The directory path.
        path: PathBuf,
    },

    /// A directory name that cannot be mapped under the root.
    #[error("invalid directory name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },
}

impl JournalError {
    /// Creates a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Returns true if the filesystem failed underneath the journal.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }

    /// Returns true if the handle that produced this error must be closed
    /// and the directory reopened from disk.
    pub fn needs_reopen(&self) -> bool {
        self.is_io() || matches!(self, Self::Consistency { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_classification() {
        let io = JournalError::from(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert!(io.is_io());
        assert!(!JournalError::consistency("gap").is_io());
        assert!(!JournalError::AlreadyRemoved { version: 3 }.is_io());
        assert!(io.needs_reopen());
        assert!(JournalError::consistency("stray index entry").needs_reopen());
        assert!(!JournalError::not_found("d").needs_reopen());
    }

    #[test]
    fn display() {
        let err = JournalError::VersionOutOfRange {
            version: 9,
            last: 4,
        };
        assert_eq!(
            err.to_string(),
            "version 9 out of range (last committed is 4)"
        );
    }
}
