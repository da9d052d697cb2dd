//! # dirsync journal
//!
//! The durable, append-only log behind every dirsync directory.
//!
//! A directory's history is a contiguous run of versions `1..=last`, split
//! across segments:
//!
//! ```text
//! <root>/<dir>/
//! ├─ LOCK                          # advisory lock, one writer process
//! ├─ 00000000000000000001.idx      # 8-byte LE log offsets, one per patch
//! ├─ 00000000000000000001.log      # tag byte + CBOR record, repeated
//! ├─ 00000000000000002001.idx
//! └─ 00000000000000002001.log
//! ```
//!
//! Only the last segment accepts appends. Removing a record never moves
//! bytes; it flips the stored tag so later reads return a tombstone.
//!
//! [`DirectoryRegistry`] owns the open [`Directory`] handles of a process,
//! keyed by the storage identity of each directory so that aliases resolve
//! to one handle.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod directory;
mod error;
mod listener;
mod registry;
mod segment;
#[cfg(test)]
mod testing;
mod types;

pub use config::JournalConfig;
pub use directory::{Directory, Patch};
pub use error::{JournalError, JournalResult};
pub use listener::{ChangeListener, ListenerId};
pub use registry::DirectoryRegistry;
pub use segment::{
    parse_index_file_name, segment_file_stem, SegmentInfo, INDEX_ENTRY_SIZE, TAG_ADD,
    TAG_REMOVE, TAG_REMOVED_ADD,
};
pub use types::{DirectoryId, Version};
