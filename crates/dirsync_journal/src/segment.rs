//! Segment files.
//!
//! A segment holds a contiguous run of versions starting at `start`. It is
//! backed by two files:
//!
//! ```text
//! <start>.idx   | offset (8, LE) | offset (8, LE) | ...
//! <start>.log   | tag (1) | CBOR record | tag (1) | CBOR record | ...
//! ```
//!
//! Entry `i` of the index is the log offset of version `start + i`. A
//! patch's log span ends at the next entry's offset, or at the end of the
//! log for the last patch.
//!
//! Tags:
//! - `+` = add
//! - `-` = remove (the record is a tombstone)
//! - `x` = add that was later removed

use crate::error::{JournalError, JournalResult};
use crate::types::Version;
use dirsync_codec::from_storage_bytes;
use dirsync_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// Size of one index entry.
pub const INDEX_ENTRY_SIZE: u64 = 8;

/// Tag of a live add.
pub const TAG_ADD: u8 = b'+';
/// Tag of a remove patch.
pub const TAG_REMOVE: u8 = b'-';
/// Tag of an add that was later removed.
pub const TAG_REMOVED_ADD: u8 = b'x';

const INDEX_EXT: &str = "idx";
const LOG_EXT: &str = "log";

/// Returns the file stem shared by a segment's index and log files.
///
/// The stem is the start version zero-padded to 20 digits, so that
/// lexicographic and numeric order agree.
#[must_use]
pub fn segment_file_stem(start: Version) -> String {
    format!("{:020}", start.as_u64())
}

/// Parses `<20 digits>.idx` back into a start version.
pub fn parse_index_file_name(name: &str) -> Option<Version> {
    let stem = name.strip_suffix(".idx")?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse::<u64>()
        .ok()
        .filter(|start| *start > 0)
        .map(Version::new)
}

/// Summary of a segment, for inspection tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// First version held by the segment.
    pub start: Version,
    /// Number of patches held.
    pub count: u64,
    /// Size of the index file in bytes.
    pub index_bytes: u64,
    /// Size of the log file in bytes.
    pub log_bytes: u64,
}

/// One segment: an index backend and a log backend.
pub(crate) struct Segment {
    start: Version,
    count: u64,
    index: Box<dyn StorageBackend>,
    log: Box<dyn StorageBackend>,
    /// A failed append could not be rolled back; only reopening repairs it.
    damaged: bool,
}

impl Segment {
    /// Wraps two backends, repairing a torn tail left by an interrupted append.
    pub(crate) fn new(
        start: Version,
        mut index: Box<dyn StorageBackend>,
        log: Box<dyn StorageBackend>,
    ) -> JournalResult<Self> {
        let index_size = index.size()?;
        let whole = index_size - index_size % INDEX_ENTRY_SIZE;
        if whole != index_size {
            tracing::warn!(
                start = %start,
                bytes = index_size - whole,
                "dropping partial index entry"
            );
            index.truncate(whole)?;
        }

        let mut segment = Self {
            start,
            count: whole / INDEX_ENTRY_SIZE,
            index,
            log,
            damaged: false,
        };
        segment.repair_tail()?;
        Ok(segment)
    }

    /// Creates a fresh segment's files; fails if either already exists.
    pub(crate) fn create(dir: &Path, start: Version) -> JournalResult<Self> {
        let stem = segment_file_stem(start);
        let index = FileBackend::create_new(&dir.join(format!("{stem}.{INDEX_EXT}")))?;
        let log = FileBackend::create_new(&dir.join(format!("{stem}.{LOG_EXT}")))?;
        Self::new(start, Box::new(index), Box::new(log))
    }

    /// Opens an existing segment's files.
    pub(crate) fn open(dir: &Path, start: Version) -> JournalResult<Self> {
        let stem = segment_file_stem(start);
        let index = FileBackend::open(&dir.join(format!("{stem}.{INDEX_EXT}")))?;
        let log = FileBackend::open(&dir.join(format!("{stem}.{LOG_EXT}")))?;
        Self::new(start, Box::new(index), Box::new(log))
    }

    /// Drops trailing patches whose log bytes never made it to disk.
    ///
    /// Appends write the index entry before the log bytes, so the only
    /// possible damage is a tail of entries pointing at a missing or
    /// truncated record.
    fn repair_tail(&mut self) -> JournalResult<()> {
        let log_size = self.log.size()?;
        while self.count > 0 {
            let last = self.count - 1;
            let offset = self.entry_offset(last)?;
            let intact = offset < log_size && {
                let bytes = self.log.read_at(offset, (log_size - offset) as usize)?;
                from_storage_bytes(&bytes[1..]).is_ok()
            };
            if intact {
                break;
            }
            tracing::warn!(
                start = %self.start,
                version = self.start.as_u64() + last,
                "dropping torn patch at segment tail"
            );
            self.index.truncate(last * INDEX_ENTRY_SIZE)?;
            self.log.truncate(offset.min(log_size))?;
            self.count = last;
        }
        Ok(())
    }

    pub(crate) fn start(&self) -> Version {
        self.start
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// One past the last version held.
    pub(crate) fn end(&self) -> u64 {
        self.start.as_u64() + self.count
    }

    pub(crate) fn contains(&self, version: Version) -> bool {
        version >= self.start && version.as_u64() < self.end()
    }

    /// Appends one patch and returns its version.
    ///
    /// On failure both files are truncated back to their previous sizes. If
    /// that fails too the segment refuses further appends, since the next
    /// index entry would land after the stray one.
    pub(crate) fn append(&mut self, tag: u8, payload: &[u8], sync: bool) -> JournalResult<Version> {
        let index_size = self.count * INDEX_ENTRY_SIZE;
        if self.damaged || self.index.size()? != index_size {
            self.damaged = true;
            return Err(JournalError::consistency(format!(
                "segment {} holds leftovers of a failed append; reopen the directory",
                self.start
            )));
        }
        let log_size = self.log.size()?;

        if let Err(err) = self.write_patch(log_size, tag, payload, sync) {
            tracing::error!(start = %self.start, error = %err, "append failed, rolling back");
            if let Err(rollback) = self.rollback(index_size, log_size) {
                tracing::error!(
                    start = %self.start,
                    error = %rollback,
                    "rollback failed, segment needs repair"
                );
                self.damaged = true;
            }
            return Err(err);
        }

        let version = Version::new(self.end());
        self.count += 1;
        Ok(version)
    }

    fn rollback(&mut self, index_size: u64, log_size: u64) -> JournalResult<()> {
        let index = self.index.truncate(index_size);
        let log = self.log.truncate(log_size);
        index?;
        log?;
        Ok(())
    }

    fn write_patch(&mut self, offset: u64, tag: u8, payload: &[u8], sync: bool) -> JournalResult<()> {
        self.index.append(&offset.to_le_bytes())?;
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(tag);
        bytes.extend_from_slice(payload);
        self.log.append(&bytes)?;

        if sync {
            self.index.sync()?;
            self.log.sync()?;
        } else {
            self.index.flush()?;
            self.log.flush()?;
        }
        Ok(())
    }

    /// Reads the tag and CBOR payload stored for `version`.
    pub(crate) fn read(&self, version: Version) -> JournalResult<(u8, Vec<u8>)> {
        let (offset, len) = self.span(version)?;
        if len == 0 {
            return Err(JournalError::segment_corruption(format!(
                "empty log span for version {version}"
            )));
        }
        let mut bytes = self.log.read_at(offset, len)?;
        let tag = bytes.remove(0);
        Ok((tag, bytes))
    }

    /// Reads only the tag byte of `version`.
    pub(crate) fn tag(&self, version: Version) -> JournalResult<u8> {
        let (offset, _) = self.span(version)?;
        Ok(self.log.read_at(offset, 1)?[0])
    }

    /// Overwrites the tag byte of `version` in place.
    pub(crate) fn set_tag(&mut self, version: Version, tag: u8, sync: bool) -> JournalResult<()> {
        let (offset, _) = self.span(version)?;
        self.log.write_at(offset, &[tag])?;
        if sync {
            self.log.sync()?;
        } else {
            self.log.flush()?;
        }
        Ok(())
    }

    pub(crate) fn info(&self) -> JournalResult<SegmentInfo> {
        Ok(SegmentInfo {
            start: self.start,
            count: self.count,
            index_bytes: self.index.size()?,
            log_bytes: self.log.size()?,
        })
    }

    fn entry_offset(&self, entry: u64) -> JournalResult<u64> {
        let bytes = self
            .index
            .read_at(entry * INDEX_ENTRY_SIZE, INDEX_ENTRY_SIZE as usize)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn span(&self, version: Version) -> JournalResult<(u64, usize)> {
        if !self.contains(version) {
            return Err(JournalError::VersionOutOfRange {
                version: version.as_u64(),
                last: self.end().saturating_sub(1),
            });
        }
        let entry = version.as_u64() - self.start.as_u64();
        let offset = self.entry_offset(entry)?;
        let end = if entry + 1 < self.count {
            self.entry_offset(entry + 1)?
        } else {
            self.log.size()?
        };
        if end < offset {
            return Err(JournalError::segment_corruption(format!(
                "index offsets decrease at version {version}"
            )));
        }
        Ok((offset, (end - offset) as usize))
    }
}
