//! Error types for the sync client.

use dirsync_journal::JournalError;
use dirsync_protocol::{ProtocolError, Status};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the sync client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Network error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Local replica error.
    #[error("replica error: {0}")]
    Journal(#[from] JournalError),

    /// The server sent something outside the grammar.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with a non-success status.
    #[error("server replied {status}: {message}")]
    Rejected {
        /// Reply status.
        status: Status,
        /// Reply text.
        message: String,
    },

    /// A patch did not follow the replica's last version.
    #[error("directory {directory} out of sync: replica at {local}, patch follows {prev}")]
    Desync {
        /// Directory name.
        directory: String,
        /// Last version applied locally.
        local: u64,
        /// Version the patch follows.
        prev: u64,
    },

    /// A patch header whose versions are not consecutive.
    #[error("invalid patch for {directory}: {prev} -> {new}")]
    InvalidPatch {
        /// Directory name.
        directory: String,
        /// Previous version.
        prev: u64,
        /// New version.
        new: u64,
    },

    /// Too many patches are waiting to be applied.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Error message.
        message: String,
    },

    /// The replica stopped applying patches; subscribe again to resume.
    #[error("replica {directory} stopped: {reason}")]
    ReplicaStopped {
        /// Directory name.
        directory: String,
        /// Why it stopped.
        reason: String,
    },

    /// No reply within the request timeout.
    #[error("operation timed out")]
    Timeout,

    /// The connection to the server is gone.
    #[error("connection closed")]
    ConnectionClosed,
}

impl ClientError {
    /// Returns true if the operation may succeed when repeated, possibly on
    /// a new connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed => true,
            ClientError::Rejected { status, .. } => *status == Status::Unavailable,
            _ => false,
        }
    }

    /// Returns true if the replica must be resubscribed before it can
    /// advance again.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            ClientError::Desync { .. }
                | ClientError::InvalidPatch { .. }
                | ClientError::ReplicaStopped { .. }
        )
    }
}
