//! Protocol messages and their encoding.

use crate::error::{ProtocolError, ProtocolResult};
use crate::status::Status;
use bytes::{BufMut, BytesMut};
use dirsync_codec::{encode_text, Action, Record};
use std::fmt;
use std::str::FromStr;

/// Command keywords. `Error` only appears in replies to unparseable commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    /// Subscribe.
    Sub,
    /// Unsubscribe.
    Unsub,
    /// Append an add.
    Put,
    /// Append a remove.
    Rem,
    /// Reply keyword for commands that could not be parsed.
    Error,
}

impl Keyword {
    /// Returns the wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sub => "SUB",
            Self::Unsub => "UNSUB",
            Self::Put => "PUT",
            Self::Rem => "REM",
            Self::Error => "ERROR",
        }
    }

    /// Returns true if a record body follows the command line.
    #[must_use]
    pub const fn has_body(self) -> bool {
        matches!(self, Self::Put | Self::Rem)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Keyword {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUB" => Ok(Self::Sub),
            "UNSUB" => Ok(Self::Unsub),
            "PUT" => Ok(Self::Put),
            "REM" => Ok(Self::Rem),
            "ERROR" => Ok(Self::Error),
            other => Err(ProtocolError::UnknownKeyword {
                seq: None,
                keyword: other.to_string(),
            }),
        }
    }
}

/// A client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `[seq] SUB dirname lastVersion`
    Subscribe {
        /// Sequence number.
        seq: Option<u64>,
        /// Directory name.
        directory: String,
        /// Last version the client already holds.
        last_version: u64,
    },
    /// `[seq] UNSUB dirname`
    Unsubscribe {
        /// Sequence number.
        seq: Option<u64>,
        /// Directory name.
        directory: String,
    },
    /// `[seq] PUT dirname` followed by a record.
    Put {
        /// Sequence number.
        seq: Option<u64>,
        /// Directory name.
        directory: String,
        /// Record to add.
        record: Record,
    },
    /// `[seq] REM dirname` followed by the record to remove.
    Remove {
        /// Sequence number.
        seq: Option<u64>,
        /// Directory name.
        directory: String,
        /// Record (or tombstone) identifying what to remove.
        record: Record,
    },
}

impl Command {
    /// Returns the sequence number.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Subscribe { seq, .. }
            | Self::Unsubscribe { seq, .. }
            | Self::Put { seq, .. }
            | Self::Remove { seq, .. } => *seq,
        }
    }

    /// Returns the keyword.
    #[must_use]
    pub fn keyword(&self) -> Keyword {
        match self {
            Self::Subscribe { .. } => Keyword::Sub,
            Self::Unsubscribe { .. } => Keyword::Unsub,
            Self::Put { .. } => Keyword::Put,
            Self::Remove { .. } => Keyword::Rem,
        }
    }

    /// Returns the target directory name.
    #[must_use]
    pub fn directory(&self) -> &str {
        match self {
            Self::Subscribe { directory, .. }
            | Self::Unsubscribe { directory, .. }
            | Self::Put { directory, .. }
            | Self::Remove { directory, .. } => directory,
        }
    }

    /// Appends the wire form to `buf`.
    ///
    /// # Errors
    ///
    /// Fails if the directory name is not a single token or the record
    /// cannot be written as text.
    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        let directory = self.directory();
        check_token(directory)?;
        let record = match self {
            Self::Put { record, .. } | Self::Remove { record, .. } => {
                Some(encode_text(record).map_err(ProtocolError::codec)?)
            }
            _ => None,
        };

        if let Some(seq) = self.seq() {
            put_str(buf, &seq.to_string());
            buf.put_u8(b' ');
        }
        put_str(buf, self.keyword().as_str());
        buf.put_u8(b' ');
        put_str(buf, directory);
        if let Self::Subscribe { last_version, .. } = self {
            buf.put_u8(b' ');
            put_str(buf, &last_version.to_string());
        }
        buf.put_u8(b'\n');
        if let Some(text) = record {
            put_str(buf, &text);
        }
        Ok(())
    }
}

/// `[seq] KEYWORD status text`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Echoed sequence number.
    pub seq: Option<u64>,
    /// Keyword of the command being answered.
    pub keyword: Keyword,
    /// Status code.
    pub status: Status,
    /// Free text; the assigned version for successful PUT and REM.
    pub text: String,
}

impl Reply {
    /// Creates a reply. Line breaks in `text` are flattened to spaces.
    pub fn new(seq: Option<u64>, keyword: Keyword, status: Status, text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self {
            seq,
            keyword,
            status,
            text: text.replace(['\r', '\n'], " "),
        }
    }

    /// Creates a 200 reply.
    pub fn ok(seq: Option<u64>, keyword: Keyword, text: impl Into<String>) -> Self {
        Self::new(seq, keyword, Status::Ok, text)
    }

    /// Parses the text as a version, as sent by successful PUT and REM.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.text.trim().parse().ok()
    }

    /// Appends the wire form to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        if let Some(seq) = self.seq {
            put_str(buf, &seq.to_string());
            buf.put_u8(b' ');
        }
        put_str(buf, self.keyword.as_str());
        buf.put_u8(b' ');
        put_str(buf, &self.status.to_string());
        if !self.text.is_empty() {
            buf.put_u8(b' ');
            put_str(buf, &self.text);
        }
        buf.put_u8(b'\n');
    }
}

/// `PATCH dirname prev new action` followed by the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchMessage {
    /// Directory name as subscribed by the client.
    pub directory: String,
    /// Version the client must hold before applying.
    pub prev: u64,
    /// Version of this patch.
    pub new: u64,
    /// Add or remove.
    pub action: Action,
    /// The record; a tombstone for removes.
    pub record: Record,
}

impl PatchMessage {
    /// Creates a patch following `prev` directly.
    pub fn new(directory: impl Into<String>, new: u64, action: Action, record: Record) -> Self {
        Self {
            directory: directory.into(),
            prev: new.saturating_sub(1),
            new,
            action,
            record,
        }
    }

    /// Appends the wire form to `buf`.
    ///
    /// # Errors
    ///
    /// Fails if the directory name is not a single token or the record
    /// cannot be written as text.
    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        check_token(&self.directory)?;
        let text = encode_text(&self.record).map_err(ProtocolError::codec)?;
        put_str(
            buf,
            &format!(
                "PATCH {} {} {} {}\n",
                self.directory, self.prev, self.new, self.action
            ),
        );
        put_str(buf, &text);
        Ok(())
    }
}

/// Anything a server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Reply to a command.
    Reply(Reply),
    /// Pushed patch.
    Patch(PatchMessage),
}

impl ServerMessage {
    /// Appends the wire form to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        match self {
            Self::Reply(reply) => {
                reply.encode(buf);
                Ok(())
            }
            Self::Patch(patch) => patch.encode(buf),
        }
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
}

fn check_token(token: &str) -> ProtocolResult<()> {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(ProtocolError::malformed(format!(
            "directory name {token:?} must be a single token"
        )));
    }
    Ok(())
}
