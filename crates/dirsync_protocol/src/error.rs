//! Protocol error types.

use crate::message::{Keyword, Reply};
use crate::status::Status;
use dirsync_codec::CodecError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or encoding protocol messages.
///
/// Decoding errors remember the sequence number and keyword of the command
/// they belong to, so a server can address its error reply.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// A line that does not follow the message grammar.
    #[error("malformed message: {message}")]
    Malformed {
        /// Sequence number, if one was parsed.
        seq: Option<u64>,
        /// Keyword, if one was parsed.
        keyword: Option<Keyword>,
        /// What was wrong.
        message: String,
    },

    /// A command keyword the decoder does not know.
    #[error("unknown keyword {keyword:?}")]
    UnknownKeyword {
        /// Sequence number, if one was parsed.
        seq: Option<u64>,
        /// The unrecognized keyword.
        keyword: String,
    },

    /// The record body failed to decode or encode.
    #[error("record error: {source}")]
    Codec {
        /// Sequence number of the enclosing command.
        seq: Option<u64>,
        /// Keyword of the enclosing command.
        keyword: Option<Keyword>,
        /// Underlying codec error.
        #[source]
        source: CodecError,
    },
}

impl ProtocolError {
    /// Creates a malformed error with no command context.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            seq: None,
            keyword: None,
            message: message.into(),
        }
    }

    /// Wraps a codec error with no command context.
    pub fn codec(source: CodecError) -> Self {
        Self::Codec {
            seq: None,
            keyword: None,
            source,
        }
    }

    /// Returns the status a server replies with.
    ///
    /// Record limit violations map to 413; everything else is a bad request.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Codec { source, .. } if source.is_resource_exhausted() => {
                Status::ResourceExhausted
            }
            _ => Status::BadRequest,
        }
    }

    /// Returns the sequence number of the offending command, if known.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Malformed { seq, .. }
            | Self::UnknownKeyword { seq, .. }
            | Self::Codec { seq, .. } => *seq,
        }
    }

    /// Returns the keyword to reply under; `ERROR` when none was parsed.
    #[must_use]
    pub fn keyword(&self) -> Keyword {
        match self {
            Self::Malformed { keyword, .. } | Self::Codec { keyword, .. } => {
                keyword.unwrap_or(Keyword::Error)
            }
            Self::UnknownKeyword { .. } => Keyword::Error,
        }
    }

    /// Builds the reply a server sends for this error.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        Reply::new(self.seq(), self.keyword(), self.status(), self.to_string())
    }

    pub(crate) fn with_context(self, seq: Option<u64>, keyword: Keyword) -> Self {
        match self {
            Self::Malformed { message, .. } => Self::Malformed {
                seq,
                keyword: Some(keyword),
                message,
            },
            Self::Codec { source, .. } => Self::Codec {
                seq,
                keyword: Some(keyword),
                source,
            },
            other @ Self::UnknownKeyword { .. } => other,
        }
    }
}
