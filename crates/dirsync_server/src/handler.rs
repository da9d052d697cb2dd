//! Command handling shared by every connection.

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use dirsync_codec::{Action, Record};
use dirsync_journal::{Directory, DirectoryRegistry, JournalError, Version};
use std::net::SocketAddr;
use std::sync::Arc;

/// State shared by all connections of one server.
pub struct ServerContext {
    config: ServerConfig,
    registry: DirectoryRegistry,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl ServerContext {
    /// Creates a context serving `config.root`.
    pub fn new(config: ServerConfig) -> Self {
        let registry = DirectoryRegistry::new(config.root.clone(), config.journal.clone());
        Self {
            config,
            registry,
            authenticator: None,
        }
    }

    /// Installs the authenticator consulted when `require_auth` is set.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the directory registry.
    #[must_use]
    pub fn registry(&self) -> &DirectoryRegistry {
        &self.registry
    }

    /// Decides whether a newly accepted peer is authenticated.
    #[must_use]
    pub fn is_authenticated(&self, peer: Option<SocketAddr>) -> bool {
        if !self.config.require_auth {
            return true;
        }
        self.authenticator
            .as_ref()
            .is_some_and(|auth| auth.authenticate(peer))
    }

    /// Looks up a directory by name.
    pub fn open(&self, name: &str, create: bool) -> ServerResult<Arc<Directory>> {
        Ok(self.registry.open(name, create)?)
    }

    /// Appends an add to `name`.
    pub fn put(&self, name: &str, record: &Record) -> ServerResult<Version> {
        let directory = self.open(name, self.config.create_missing)?;
        let version = directory
            .append(Action::Add, record)
            .map_err(|err| self.journal_failure(&directory, err))?;
        tracing::debug!(directory = name, version = %version, "put");
        Ok(version)
    }

    /// Removes the newest live record in `name` matching `record`.
    pub fn remove(&self, name: &str, record: &Record) -> ServerResult<Version> {
        let directory = self.open(name, false)?;
        let version = directory
            .remove(record)
            .map_err(|err| self.journal_failure(&directory, err))?;
        tracing::debug!(directory = name, version = %version, "remove");
        Ok(version)
    }

    /// Closes the directory when the filesystem failed underneath it, so
    /// the next lookup reopens and repairs it.
    pub(crate) fn journal_failure(&self, directory: &Arc<Directory>, err: JournalError) -> ServerError {
        if err.needs_reopen() {
            tracing::error!(
                path = %directory.path().display(),
                error = %err,
                "directory failed, closing it"
            );
            self.registry.discard(directory);
        }
        ServerError::Journal(err)
    }
}
