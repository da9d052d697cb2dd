//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A field name or value cannot be represented in the text form.
    #[error("invalid field: {message}")]
    InvalidField {
        /// Description of the problem.
        message: String,
    },

    /// A text line is not a `name: value` pair.
    #[error("malformed record line: {line:?}")]
    MalformedLine {
        /// The offending line.
        line: String,
    },

    /// The record exceeds the configured limits.
    #[error("record too large: {message}")]
    ResourceExhausted {
        /// Which limit was hit.
        message: String,
    },

    /// The text ended before the blank terminator line.
    #[error("record is missing its blank terminator line")]
    Unterminated,

    /// A digest string is not 64 lowercase hex characters.
    #[error("invalid digest: {0:?}")]
    InvalidDigest(String),

    /// An action character is neither `+` nor `-`.
    #[error("invalid action: {0:?}")]
    InvalidAction(char),

    /// CBOR storage encoding or decoding failed.
    #[error("storage encoding failed: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid field error.
    pub fn invalid_field(message: impl Into<String>) -> Self {
        Self::InvalidField {
            message: message.into(),
        }
    }

    /// Creates a resource exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Creates a storage encoding error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true if the error is a size limit violation.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}
