//! Configuration for the sync client.

use crate::error::{ClientError, ClientResult};
use dirsync_codec::RecordLimits;
use dirsync_journal::JournalConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`.
    pub server_addr: String,
    /// Directory holding one local replica per subscribed directory.
    pub replica_root: PathBuf,
    /// How long to wait for a reply.
    pub request_timeout: Duration,
    /// Patches that may wait for outstanding writes before the replica
    /// gives up.
    pub max_buffered: usize,
    /// Limits applied to pushed record bodies.
    pub record_limits: RecordLimits,
    /// Journal settings for the replicas.
    pub journal: JournalConfig,
}

impl ClientConfig {
    /// Creates a configuration for `server_addr` keeping replicas under
    /// `replica_root`.
    pub fn new(server_addr: impl Into<String>, replica_root: impl Into<PathBuf>) -> Self {
        Self {
            server_addr: server_addr.into(),
            replica_root: replica_root.into(),
            request_timeout: Duration::from_secs(30),
            max_buffered: 10_000,
            record_limits: RecordLimits::default(),
            journal: JournalConfig::new().create_if_missing(true),
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the bound on buffered patches.
    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max;
        self
    }

    /// Sets the record limits.
    pub fn with_record_limits(mut self, limits: RecordLimits) -> Self {
        self.record_limits = limits;
        self
    }

    /// Sets the replica journal settings.
    pub fn with_journal(mut self, journal: JournalConfig) -> Self {
        self.journal = journal.create_if_missing(true);
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if self.server_addr.is_empty() {
            return Err(ClientError::Config("server_addr is empty".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(ClientError::Config("request_timeout must be positive".into()));
        }
        if self.max_buffered == 0 {
            return Err(ClientError::Config("max_buffered must be positive".into()));
        }
        Ok(())
    }
}
