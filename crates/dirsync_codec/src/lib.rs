//! # dirsync codec
//!
//! The record model shared by every dirsync crate, and its two encodings:
//!
//! - **text**, used on the wire: `name: value` lines closed by a blank line
//! - **storage**, used inside journal logs: CBOR through `serde`
//!
//! A [`Record`] is an ordered list of text fields. Its [`Digest`] is the
//! SHA-256 of its text form and is what a tombstone keeps once the record
//! has been removed.
//!
//! ## Usage
//!
//! ```
//! use dirsync_codec::{decode_text, encode_text, Record};
//!
//! let record = Record::new()
//!     .with_field("type", "mail")
//!     .with_field("descr", "hi");
//!
//! let text = encode_text(&record).unwrap();
//! assert_eq!(text, "type: mail\ndescr: hi\n\n");
//! assert_eq!(decode_text(&text).unwrap(), record);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod digest;
mod error;
mod record;
mod storage;
mod text;

pub use action::Action;
pub use digest::Digest;
pub use error::{CodecError, CodecResult};
pub use record::{Record, FILENAME_FIELD, LOCAL_ID_FIELD, TOMBSTONE_FIELD};
pub use storage::{from_storage_bytes, to_storage_bytes};
pub use text::{decode_text, encode_text, RecordLimits, RecordReader};
