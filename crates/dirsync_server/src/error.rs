//! Error types for the sync server.

use dirsync_journal::JournalError;
use dirsync_protocol::{ProtocolError, Status};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid configuration; fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Journal error.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// Malformed command.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// UNSUB for a directory without a subscription.
    #[error("not subscribed to {0}")]
    NotSubscribed(String),

    /// The peer is not authenticated.
    #[error("authentication required")]
    Unauthenticated,

    /// A line exceeded `max_line_bytes`; fatal for the connection.
    #[error("line exceeds {limit} bytes")]
    LineTooLong {
        /// The configured limit.
        limit: usize,
    },

    /// A push task was aborted mid-patch; fatal for the connection.
    #[error("output stream torn by an aborted push")]
    StreamTorn,

    /// I/O error on the connection or listener.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns the reply status for this error.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Journal(err) => journal_status(err),
            Self::Protocol(err) => err.status(),
            Self::NotSubscribed(_) => Status::NotSubscribed,
            Self::Unauthenticated => Status::Unauthenticated,
            Self::LineTooLong { .. } => Status::ResourceExhausted,
            Self::Config(_) | Self::StreamTorn | Self::Io(_) => Status::Internal,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }
}

fn journal_status(err: &JournalError) -> Status {
    match err {
        JournalError::NotFound { .. } | JournalError::RecordNotFound { .. } => Status::NotFound,
        JournalError::InvalidName { .. } => Status::BadRequest,
        JournalError::Codec(codec) if codec.is_resource_exhausted() => Status::ResourceExhausted,
        JournalError::Codec(dirsync_codec::CodecError::InvalidField { .. }) => Status::BadRequest,
        JournalError::DirectoryLocked { .. } | JournalError::Closed { .. } => Status::Unavailable,
        err if err.is_io() => Status::Unavailable,
        _ => Status::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_codec::CodecError;

    #[test]
    fn error_classification() {
        assert!(ServerError::Unauthenticated.is_client_error());
        assert!(ServerError::NotSubscribed("d".into()).is_server_error());
        assert!(ServerError::Config("bad".into()).is_server_error());
        assert!(!ServerError::Unauthenticated.is_server_error());
    }

    #[test]
    fn journal_statuses() {
        let status = |err: JournalError| ServerError::from(err).status().code();
        assert_eq!(status(JournalError::not_found("d")), 404);
        assert_eq!(
            status(JournalError::InvalidName { name: "..".into() }),
            400
        );
        assert_eq!(
            status(JournalError::Codec(CodecError::invalid_field("bad name"))),
            400
        );
        assert_eq!(
            status(JournalError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk"
            ))),
            503
        );
        assert_eq!(status(JournalError::consistency("gap")), 500);
    }

    #[test]
    fn error_display() {
        let err = ServerError::LineTooLong { limit: 64 };
        assert_eq!(err.to_string(), "line exceeds 64 bytes");
        assert_eq!(err.status(), Status::ResourceExhausted);
    }
}
