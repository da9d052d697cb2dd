//! # dirsync storage
//!
//! Byte-store backends for dirsync journal segments.
//!
//! Every journal segment is a pair of files: an index of fixed-width offsets
//! and a log of tagged records. Both are plain byte stores as far as this
//! crate is concerned; the journal owns the format.
//!
//! Backends support exactly the mutations an append-only journal needs:
//!
//! - `append` at the end
//! - `write_at` inside already written bytes (the tag flip on removal)
//! - `truncate` back to an earlier size (rolling back a torn append)
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - persistent storage through OS file APIs
//! - [`InMemoryBackend`] - for tests
//!
//! ## Example
//!
//! ```rust
//! use dirsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let offset = log.append(b"+payload").unwrap();
//! log.write_at(offset, b"x").unwrap();
//! assert_eq!(log.read_at(offset, 8).unwrap(), b"xpayload");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
