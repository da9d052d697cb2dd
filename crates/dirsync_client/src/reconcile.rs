//! Speculative local writes and their mapping onto server versions.
//!
//! A write goes through three steps:
//!
//! 1. [`Reconciler::begin_write`] keeps a speculative copy under a
//!    placeholder [`LocalVersion`] while the command is in flight.
//! 2. The reply either confirms it ([`Reconciler::confirm`], recording
//!    `central -> local`) or rejects it ([`Reconciler::reject`]).
//! 3. When the patch for that central version is applied,
//!    [`Reconciler::take_mapping`] hands back the placeholder once and the
//!    speculative copy is dropped.

use dirsync_codec::{Action, Record};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Placeholder version for a write the server has not confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalVersion(u64);

impl LocalVersion {
    /// Wraps a raw placeholder number.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Returns the raw number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct PendingWrite {
    key: String,
    action: Action,
    local: LocalVersion,
}

/// Tracks one replica's writes between issue and application.
#[derive(Debug)]
pub struct Reconciler {
    sequence: Arc<AtomicU64>,
    next_local: u64,
    pending: HashMap<u64, PendingWrite>,
    mappings: HashMap<u64, LocalVersion>,
    speculative: BTreeMap<LocalVersion, (Action, Record)>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    /// Creates a reconciler with its own sequence numbers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sequence(Arc::new(AtomicU64::new(1)))
    }

    /// Creates a reconciler drawing sequence numbers from a counter shared
    /// by everything on one connection.
    #[must_use]
    pub fn with_sequence(sequence: Arc<AtomicU64>) -> Self {
        Self {
            sequence,
            next_local: 1,
            pending: HashMap::new(),
            mappings: HashMap::new(),
            speculative: BTreeMap::new(),
        }
    }

    /// Records a write about to be sent and returns its command sequence
    /// number and placeholder version.
    pub fn begin_write(&mut self, action: Action, record: Record) -> (u64, LocalVersion) {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let local = LocalVersion(self.next_local);
        self.next_local += 1;

        let key = record
            .filename()
            .map_or_else(|| record.digest().to_string(), str::to_string);
        tracing::trace!(seq, local = %local, key = %key, action = %action, "speculative write");
        self.pending.insert(seq, PendingWrite { key, action, local });
        self.speculative.insert(local, (action, record));
        (seq, local)
    }

    /// Maps `central` onto the placeholder of the write sent as `seq`.
    ///
    /// Returns the placeholder, or `None` if `seq` was not pending.
    pub fn confirm(&mut self, seq: u64, central: u64) -> Option<LocalVersion> {
        let write = self.pending.remove(&seq)?;
        tracing::trace!(seq, central, local = %write.local, key = %write.key, "write confirmed");
        self.mappings.insert(central, write.local);
        Some(write.local)
    }

    /// Drops the write sent as `seq` along with its speculative record.
    pub fn reject(&mut self, seq: u64) -> Option<LocalVersion> {
        let write = self.pending.remove(&seq)?;
        self.speculative.remove(&write.local);
        tracing::debug!(seq, key = %write.key, action = %write.action, "write rejected");
        Some(write.local)
    }

    /// Consumes the mapping for `central`, discarding the speculative copy.
    pub fn take_mapping(&mut self, central: u64) -> Option<LocalVersion> {
        let local = self.mappings.remove(&central)?;
        self.speculative.remove(&local);
        Some(local)
    }

    /// Returns true while any write awaits its reply.
    #[must_use]
    pub fn has_outstanding(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of writes awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of confirmed writes whose patch has not been applied yet.
    #[must_use]
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Returns the placeholder of the pending write keyed by `key` (the
    /// record's filename, or its digest when it has none).
    pub fn pending_for(&self, key: &str) -> Option<LocalVersion> {
        self.pending
            .values()
            .find(|write| write.key == key)
            .map(|write| write.local)
    }

    /// Returns the speculative record stored under `local`.
    pub fn speculative(&self, local: LocalVersion) -> Option<(Action, &Record)> {
        self.speculative
            .get(&local)
            .map(|(action, record)| (*action, record))
    }

    /// Speculative records not yet replaced by their patch, oldest first.
    pub fn speculative_records(&self) -> impl Iterator<Item = (LocalVersion, Action, &Record)> {
        self.speculative
            .iter()
            .map(|(local, (action, record))| (*local, *action, record))
    }
}
