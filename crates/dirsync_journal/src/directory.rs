//! Directory handles.
//!
//! A [`Directory`] owns the ordered segments of one journal directory and
//! the exclusive `LOCK` that makes this process its only writer.

use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::listener::{ChangeListener, ListenerId, Listeners};
use crate::segment::{
    parse_index_file_name, Segment, SegmentInfo, TAG_ADD, TAG_REMOVE, TAG_REMOVED_ADD,
};
use crate::types::{DirectoryId, Version};
use dirsync_codec::{from_storage_bytes, to_storage_bytes, Action, Digest, Record};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";

/// A committed patch as read back from the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Version of the patch.
    pub version: Version,
    /// Add or remove.
    pub action: Action,
    /// The record; a tombstone for removes.
    pub record: Record,
}

/// An open journal directory.
///
/// # Thread Safety
///
/// Appends and removals take the writer lock; reads share the reader lock.
/// Listeners are notified after the writer lock is released.
pub struct Directory {
    id: DirectoryId,
    path: PathBuf,
    config: JournalConfig,
    segments: RwLock<Vec<Segment>>,
    listeners: Listeners,
    closed: AtomicBool,
    /// Held until [`Directory::close`] or drop.
    lock_file: Mutex<Option<File>>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("last_version", &self.last_version())
            .finish_non_exhaustive()
    }
}

impl Directory {
    /// Opens the directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `config.create_if_missing` is false
    /// - Another process holds the lock (`DirectoryLocked`)
    /// - Segments overlap or leave a gap (`Consistency`)
    /// - I/O errors occur
    pub fn open(path: &Path, config: &JournalConfig) -> JournalResult<Self> {
        let created = if path.exists() {
            false
        } else if config.create_if_missing {
            fs::create_dir_all(path)?;
            true
        } else {
            return Err(JournalError::not_found(path.display().to_string()));
        };

        if !path.is_dir() {
            return Err(JournalError::not_found(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(JournalError::DirectoryLocked {
                path: path.to_path_buf(),
            });
        }

        let id = DirectoryId::of(path)?;
        let mut segments = load_segments(path)?;
        if created && segments.is_empty() {
            segments.push(Segment::create(path, Version::new(1))?);
            sync_directory(path)?;
        }

        let directory = Self {
            id,
            path: path.to_path_buf(),
            config: config.clone(),
            segments: RwLock::new(segments),
            listeners: Listeners::default(),
            closed: AtomicBool::new(false),
            lock_file: Mutex::new(Some(lock_file)),
        };
        tracing::info!(
            path = %directory.path.display(),
            id = %directory.id,
            last_version = %directory.last_version(),
            created,
            "opened directory"
        );
        Ok(directory)
    }

    /// Returns the storage identity.
    #[must_use]
    pub fn id(&self) -> DirectoryId {
        self.id
    }

    /// Returns the path the directory was opened through.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the handle and releases the directory lock, so the directory
    /// can be opened again even while clones of this handle are alive.
    ///
    /// Every later operation on this handle fails with
    /// [`JournalError::Closed`]. Listeners get [`ChangeListener::on_close`].
    pub fn close(&self) {
        {
            let _writer = self.segments.write();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            // Dropping the descriptor releases the advisory lock.
            drop(self.lock_file.lock().take());
        }
        tracing::info!(id = %self.id, path = %self.path.display(), "closed directory");
        self.listeners.notify_closed(self.id);
    }

    /// Returns true once [`Directory::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> JournalResult<()> {
        if self.is_closed() {
            return Err(JournalError::Closed {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Returns the last committed version, or `Version::ZERO` when empty.
    #[must_use]
    pub fn last_version(&self) -> Version {
        last_of(&self.segments.read())
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Returns a summary of every segment in version order.
    pub fn segments(&self) -> JournalResult<Vec<SegmentInfo>> {
        self.segments.read().iter().map(Segment::info).collect()
    }

    /// Appends a patch and returns its version.
    ///
    /// A remove whose record is not already a tombstone is stored as the
    /// tombstone of that record.
    pub fn append(&self, action: Action, record: &Record) -> JournalResult<Version> {
        let (tag, payload) = match action {
            Action::Add => {
                record.validate()?;
                (TAG_ADD, to_storage_bytes(record)?)
            }
            Action::Remove if record.is_tombstone() => (TAG_REMOVE, to_storage_bytes(record)?),
            Action::Remove => (
                TAG_REMOVE,
                to_storage_bytes(&Record::tombstone(record.digest()))?,
            ),
        };

        let version = {
            let mut segments = self.segments.write();
            self.ensure_open()?;
            self.append_locked(&mut segments, tag, &payload)?
        };
        tracing::debug!(id = %self.id, version = %version, action = %action, "appended patch");
        self.listeners.notify(self.id, version);
        Ok(version)
    }

    /// Reads the patch stored at `version`.
    ///
    /// A removed add reads back as a remove carrying the tombstone of the
    /// original record.
    pub fn read(&self, version: Version) -> JournalResult<Patch> {
        let segments = self.segments.read();
        self.ensure_open()?;
        let segment = find_segment(&segments, version)?;
        let (tag, bytes) = segment.read(version)?;
        let record = from_storage_bytes(&bytes)?;
        let (action, record) = match tag {
            TAG_ADD => (Action::Add, record),
            TAG_REMOVE => (Action::Remove, record),
            TAG_REMOVED_ADD => (Action::Remove, Record::tombstone(record.digest())),
            other => {
                return Err(JournalError::segment_corruption(format!(
                    "unknown tag {other:#04x} at version {version}"
                )))
            }
        };
        Ok(Patch {
            version,
            action,
            record,
        })
    }

    /// Marks the add at `version` as removed, in place.
    pub fn mark_removed(&self, version: Version) -> JournalResult<()> {
        let mut segments = self.segments.write();
        self.ensure_open()?;
        self.mark_removed_locked(&mut segments, version)
    }

    /// Removes the newest live record matching `record` and returns the
    /// version of the remove patch.
    ///
    /// A tombstone matches by digest. Any other record matches an add with
    /// the same digest or, when it carries a filename, the same filename.
    ///
    /// Once the remove patch is committed, listeners hear of it even if
    /// flipping the add's tag then fails; that failure is still returned.
    pub fn remove(&self, record: &Record) -> JournalResult<Version> {
        let target = record.tombstone_digest().unwrap_or_else(|| record.digest());
        let filename = if record.is_tombstone() {
            None
        } else {
            record.filename()
        };
        let matches = |stored: &Record| {
            stored.digest() == target || (filename.is_some() && stored.filename() == filename)
        };

        let (version, found, marked) = {
            let mut segments = self.segments.write();
            self.ensure_open()?;
            let Some((found, original)) = find_live_in(&segments, &matches)? else {
                return Err(JournalError::RecordNotFound {
                    what: filename.map_or_else(|| target.to_string(), str::to_string),
                });
            };
            let payload = to_storage_bytes(&Record::tombstone(original.digest()))?;
            let version = self.append_locked(&mut segments, TAG_REMOVE, &payload)?;
            let marked = self.mark_removed_locked(&mut segments, found);
            (version, found, marked)
        };
        self.listeners.notify(self.id, version);
        if let Err(err) = marked {
            tracing::error!(
                id = %self.id,
                version = %version,
                add = %found,
                error = %err,
                "remove committed but the add was not marked removed"
            );
            return Err(err);
        }
        tracing::debug!(id = %self.id, version = %version, "removed record");
        Ok(version)
    }

    /// Returns the newest live add with the given digest.
    pub fn locate(&self, digest: &Digest) -> JournalResult<Option<Version>> {
        Ok(self
            .find_live(|record| record.digest() == *digest)?
            .map(|(version, _)| version))
    }

    /// Returns the newest live add whose record satisfies `predicate`.
    pub fn find_live(
        &self,
        predicate: impl Fn(&Record) -> bool,
    ) -> JournalResult<Option<(Version, Record)>> {
        let segments = self.segments.read();
        self.ensure_open()?;
        find_live_in(&segments, &predicate)
    }

    /// Registers a listener called after every committed append.
    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Deregisters a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn append_locked(
        &self,
        segments: &mut Vec<Segment>,
        tag: u8,
        payload: &[u8],
    ) -> JournalResult<Version> {
        let rotate = segments
            .last()
            .map_or(true, |s| s.count() >= self.config.max_segment_patches);
        if rotate {
            let start = last_of(segments).next();
            let segment = Segment::create(&self.path, start)?;
            sync_directory(&self.path)?;
            tracing::info!(id = %self.id, start = %start, "started new segment");
            segments.push(segment);
        }

        let current = segments
            .last_mut()
            .ok_or_else(|| JournalError::consistency("no writable segment"))?;
        current.append(tag, payload, self.config.sync_on_append)
    }

    fn mark_removed_locked(&self, segments: &mut [Segment], version: Version) -> JournalResult<()> {
        let index = segment_index(segments, version)?;
        let segment = &mut segments[index];
        match segment.tag(version)? {
            TAG_ADD => segment.set_tag(version, TAG_REMOVED_ADD, self.config.sync_on_append),
            TAG_REMOVED_ADD => Err(JournalError::AlreadyRemoved {
                version: version.as_u64(),
            }),
            _ => Err(JournalError::NotAnAdd {
                version: version.as_u64(),
            }),
        }
    }
}

fn last_of(segments: &[Segment]) -> Version {
    segments
        .last()
        .map_or(Version::ZERO, |s| Version::new(s.end() - 1))
}

fn segment_index(segments: &[Segment], version: Version) -> JournalResult<usize> {
    let after = segments.partition_point(|s| s.start() <= version);
    match after.checked_sub(1) {
        Some(index) if segments[index].contains(version) => Ok(index),
        _ => Err(JournalError::VersionOutOfRange {
            version: version.as_u64(),
            last: last_of(segments).as_u64(),
        }),
    }
}

fn find_segment(segments: &[Segment], version: Version) -> JournalResult<&Segment> {
    segment_index(segments, version).map(|index| &segments[index])
}

fn find_live_in(
    segments: &[Segment],
    predicate: &dyn Fn(&Record) -> bool,
) -> JournalResult<Option<(Version, Record)>> {
    for segment in segments.iter().rev() {
        for v in (segment.start().as_u64()..segment.end()).rev() {
            let version = Version::new(v);
            let (tag, bytes) = segment.read(version)?;
            if tag != TAG_ADD {
                continue;
            }
            let record = from_storage_bytes(&bytes)?;
            if predicate(&record) {
                return Ok(Some((version, record)));
            }
        }
    }
    Ok(None)
}

/// Scans `*.idx` files and opens the segments in version order.
fn load_segments(path: &Path) -> JournalResult<Vec<Segment>> {
    let mut starts = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            tracing::warn!(path = %path.display(), "skipping file with non UTF-8 name");
            continue;
        };
        if name == LOCK_FILE {
            continue;
        }
        if let Some(start) = parse_index_file_name(name) {
            starts.push(start);
        } else if !name.ends_with(".log") {
            tracing::warn!(path = %path.display(), file = name, "skipping unrecognized file");
        }
    }
    starts.sort();

    let mut segments: Vec<Segment> = Vec::with_capacity(starts.len());
    for start in starts {
        let expected = segments.last().map_or(1, Segment::end);
        if start.as_u64() != expected {
            let kind = if start.as_u64() < expected {
                "overlap"
            } else {
                "gap"
            };
            return Err(JournalError::consistency(format!(
                "{kind} in {}: segment starting at {start} follows versions up to {}",
                path.display(),
                expected - 1
            )));
        }
        segments.push(Segment::open(path, start)?);
    }
    Ok(segments)
}

/// Syncs a directory so newly created files survive a crash.
#[cfg(unix)]
fn sync_directory(path: &Path) -> JournalResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> JournalResult<()> {
    Ok(())
}
