//! Server configuration.

use crate::error::{ServerError, ServerResult};
use dirsync_codec::RecordLimits;
use dirsync_journal::JournalConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Directory holding one subdirectory per served directory.
    pub root: PathBuf,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Longest accepted line, newline included.
    pub max_line_bytes: usize,
    /// Limits applied to record bodies.
    pub record_limits: RecordLimits,
    /// Journal settings used for every directory.
    pub journal: JournalConfig,
    /// Whether SUB, PUT and REM require an authenticated peer.
    pub require_auth: bool,
    /// Whether SUB and PUT create a missing directory.
    pub create_missing: bool,
}

impl ServerConfig {
    /// Creates a configuration serving `root` on `bind_addr`.
    pub fn new(bind_addr: SocketAddr, root: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr,
            root: root.into(),
            max_connections: 1000,
            max_line_bytes: 64 * 1024,
            record_limits: RecordLimits::default(),
            journal: JournalConfig::default(),
            require_auth: false,
            create_missing: true,
        }
    }

    /// Sets the maximum concurrent connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the maximum line length.
    #[must_use]
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    /// Sets the record body limits.
    #[must_use]
    pub fn with_record_limits(mut self, limits: RecordLimits) -> Self {
        self.record_limits = limits;
        self
    }

    /// Sets the journal configuration.
    #[must_use]
    pub fn with_journal(mut self, journal: JournalConfig) -> Self {
        self.journal = journal;
        self
    }

    /// Requires authentication for SUB, PUT and REM.
    #[must_use]
    pub fn with_auth(mut self) -> Self {
        self.require_auth = true;
        self
    }

    /// Sets whether SUB and PUT create missing directories.
    #[must_use]
    pub fn with_create_missing(mut self, value: bool) -> Self {
        self.create_missing = value;
        self
    }

    /// Checks the configuration before the server starts.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> ServerResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(ServerError::Config("root directory is empty".into()));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be positive".into()));
        }
        if self.max_line_bytes < 64 {
            return Err(ServerError::Config(format!(
                "max_line_bytes {} is below the minimum of 64",
                self.max_line_bytes
            )));
        }
        if self.record_limits.max_fields == 0 || self.record_limits.max_record_bytes == 0 {
            return Err(ServerError::Config("record limits must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap(), "/srv/dirsync")
    }

    #[test]
    fn default_values() {
        let config = config();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_line_bytes, 64 * 1024);
        assert!(!config.require_auth);
        assert!(config.create_missing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder() {
        let config = config()
            .with_max_connections(8)
            .with_max_line_bytes(4096)
            .with_journal(JournalConfig::new().max_segment_patches(10))
            .with_auth()
            .with_create_missing(false);

        assert_eq!(config.max_connections, 8);
        assert_eq!(config.max_line_bytes, 4096);
        assert_eq!(config.journal.max_segment_patches, 10);
        assert!(config.require_auth);
        assert!(!config.create_missing);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(matches!(
            config().with_max_connections(0).validate(),
            Err(ServerError::Config(_))
        ));
        assert!(config().with_max_line_bytes(10).validate().is_err());
        assert!(ServerConfig::new("127.0.0.1:0".parse().unwrap(), "")
            .validate()
            .is_err());
    }
}
