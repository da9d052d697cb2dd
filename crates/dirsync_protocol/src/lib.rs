//! # dirsync protocol
//!
//! Messages exchanged between dirsync clients and servers.
//!
//! The protocol is line-oriented ASCII. Clients send commands, optionally
//! prefixed by a sequence number that the server echoes in its reply:
//!
//! ```text
//! 7 SUB inbox 12
//! 8 PUT inbox
//! filename: 1234.eml
//! descr: hello
//!
//! ```
//!
//! The server answers each command with a reply and pushes patches as they
//! are committed:
//!
//! ```text
//! 7 SUB 200 ok
//! 8 PUT 200 13
//! PATCH inbox 12 13 +
//! filename: 1234.eml
//! descr: hello
//!
//! ```
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decode;
mod error;
mod message;
mod status;

pub use decode::{CommandDecoder, ServerMessageDecoder};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Command, Keyword, PatchMessage, Reply, ServerMessage};
pub use status::Status;
