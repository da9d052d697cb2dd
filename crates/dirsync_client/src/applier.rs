//! In-order application of pushed patches to a local replica.

use crate::error::{ClientError, ClientResult};
use crate::reconcile::Reconciler;
use dirsync_codec::{Action, Digest, Record, LOCAL_ID_FIELD};
use dirsync_journal::{Directory, JournalError, Version};
use dirsync_protocol::PatchMessage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Buffers pushed patches and applies them to a replica strictly in order.
///
/// The replica's versions track the server's one for one: the patch that
/// follows version `n` is applied only when the replica's last version is
/// `n`, and it must land at `n + 1`.
pub struct PatchApplier {
    name: String,
    replica: Arc<Directory>,
    buffer: BTreeMap<u64, PatchMessage>,
    max_buffered: usize,
}

impl PatchApplier {
    /// Creates an applier for `replica`.
    pub fn new(name: impl Into<String>, replica: Arc<Directory>, max_buffered: usize) -> Self {
        Self {
            name: name.into(),
            replica,
            buffer: BTreeMap::new(),
            max_buffered,
        }
    }

    /// Returns the replica.
    #[must_use]
    pub fn replica(&self) -> &Arc<Directory> {
        &self.replica
    }

    /// Number of patches waiting to be applied.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Forgets every buffered patch.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Buffers a pushed patch.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidPatch`] unless `new == prev + 1`, and
    /// [`ClientError::ResourceExhausted`] when the buffer is full.
    pub fn receive(&mut self, patch: PatchMessage) -> ClientResult<()> {
        if patch.prev.checked_add(1) != Some(patch.new) {
            return Err(ClientError::InvalidPatch {
                directory: self.name.clone(),
                prev: patch.prev,
                new: patch.new,
            });
        }
        if self.buffer.len() >= self.max_buffered && !self.buffer.contains_key(&patch.prev) {
            return Err(ClientError::ResourceExhausted {
                message: format!(
                    "{} patches buffered for {}",
                    self.buffer.len(),
                    self.name
                ),
            });
        }
        self.buffer.insert(patch.prev, patch);
        Ok(())
    }

    /// Applies every buffered patch that follows the replica, returning how
    /// many were applied.
    ///
    /// Nothing is applied while `reconciler` has writes awaiting a reply.
    ///
    /// # Errors
    ///
    /// [`ClientError::Desync`] when the next buffered patch does not follow
    /// the replica's last version.
    pub fn drain(&mut self, reconciler: &mut Reconciler) -> ClientResult<usize> {
        if reconciler.has_outstanding() {
            return Ok(0);
        }
        let mut applied = 0;
        while let Some(entry) = self.buffer.first_entry() {
            let last = self.replica.last_version().as_u64();
            let prev = *entry.key();
            if prev < last {
                entry.remove();
                tracing::debug!(directory = %self.name, prev, last, "dropped stale patch");
                continue;
            }
            if prev > last {
                return Err(ClientError::Desync {
                    directory: self.name.clone(),
                    local: last,
                    prev,
                });
            }
            let patch = entry.remove();
            self.apply(patch, reconciler)?;
            applied += 1;
        }
        Ok(applied)
    }

    fn apply(&self, patch: PatchMessage, reconciler: &mut Reconciler) -> ClientResult<()> {
        let local = reconciler.take_mapping(patch.new);
        let version = match patch.action {
            Action::Add => {
                let mut record = patch.record;
                if let Some(local) = local {
                    record.set_field(LOCAL_ID_FIELD, local.to_string());
                }
                self.replica.append(Action::Add, &record)?
            }
            Action::Remove => {
                let target = patch
                    .record
                    .tombstone_digest()
                    .unwrap_or_else(|| patch.record.digest());
                let found = self
                    .replica
                    .find_live(|stored| server_digest(stored) == target)?;
                let version = self
                    .replica
                    .append(Action::Remove, &Record::tombstone(target))?;
                if let Some((added, _)) = found {
                    self.replica.mark_removed(added)?;
                }
                version
            }
        };

        if version != Version::new(patch.new) {
            return Err(JournalError::consistency(format!(
                "replica {} applied patch {} at {version}",
                self.name, patch.new
            ))
            .into());
        }
        tracing::debug!(
            directory = %self.name,
            version = patch.new,
            action = %patch.action,
            localid = ?local,
            "applied patch"
        );
        Ok(())
    }
}

/// Digest the server knows a replica record by: its own, minus `localid`.
fn server_digest(record: &Record) -> Digest {
    if record.field(LOCAL_ID_FIELD).is_none() {
        return record.digest();
    }
    let mut stripped = record.clone();
    stripped.remove_field(LOCAL_ID_FIELD);
    stripped.digest()
}
