//! Registry of open directories.

use crate::config::JournalConfig;
use crate::directory::Directory;
use crate::error::{JournalError, JournalResult};
use crate::types::DirectoryId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Owns the open directories under one root, keyed by storage identity.
///
/// Names are resolved through symlinks before the lookup, so two aliases of
/// one directory share a single [`Directory`] handle and a single lock.
pub struct DirectoryRegistry {
    root: PathBuf,
    config: JournalConfig,
    open: RwLock<HashMap<DirectoryId, Arc<Directory>>>,
}

impl DirectoryRegistry {
    /// Creates a registry serving directories under `root`.
    pub fn new(root: impl Into<PathBuf>, config: JournalConfig) -> Self {
        Self {
            root: root.into(),
            config,
            open: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the journal configuration used for every directory.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Returns the handle for `name`, opening it if needed.
    ///
    /// # Errors
    ///
    /// `InvalidName` for names that escape the root, `NotFound` when the
    /// directory is missing and `create_if_missing` is false, or any error
    /// from [`Directory::open`].
    pub fn open(&self, name: &str, create_if_missing: bool) -> JournalResult<Arc<Directory>> {
        let path = self.resolve(name)?;

        if path.exists() {
            let id = DirectoryId::of(&path)?;
            if let Some(directory) = self.open.read().get(&id).filter(|d| !d.is_closed()) {
                return Ok(Arc::clone(directory));
            }
        } else if !create_if_missing {
            return Err(JournalError::not_found(name));
        }

        let mut open = self.open.write();
        // Someone may have opened it, or created it, while we waited.
        if path.exists() {
            let id = DirectoryId::of(&path)?;
            match open.get(&id) {
                Some(directory) if !directory.is_closed() => return Ok(Arc::clone(directory)),
                Some(_) => {
                    open.remove(&id);
                }
                None => {}
            }
        }

        let config = self.config.clone().create_if_missing(create_if_missing);
        let directory = Arc::new(Directory::open(&path, &config)?);
        open.insert(directory.id(), Arc::clone(&directory));
        tracing::debug!(name, id = %directory.id(), "registered directory");
        Ok(directory)
    }

    /// Returns an already open directory.
    #[must_use]
    pub fn get(&self, id: DirectoryId) -> Option<Arc<Directory>> {
        self.open.read().get(&id).cloned()
    }

    /// Closes and forgets the handle for `id` so the next lookup reopens
    /// the directory from disk.
    ///
    /// Clones of the handle held elsewhere (subscriptions, requests in
    /// flight) see [`JournalError::Closed`] from then on.
    pub fn evict(&self, id: DirectoryId) -> Option<Arc<Directory>> {
        let evicted = self.open.write().remove(&id);
        if let Some(directory) = &evicted {
            directory.close();
            tracing::warn!(id = %id, "evicted directory");
        }
        evicted
    }

    /// Closes `directory` after a failure, and forgets it if it is still
    /// the registered handle. A newer handle for the same directory is left
    /// alone.
    pub fn discard(&self, directory: &Arc<Directory>) {
        {
            let mut open = self.open.write();
            if open
                .get(&directory.id())
                .is_some_and(|current| Arc::ptr_eq(current, directory))
            {
                open.remove(&directory.id());
            }
        }
        directory.close();
    }

    /// Returns the number of open directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.read().len()
    }

    /// Returns true if no directory is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.read().is_empty()
    }

    fn resolve(&self, name: &str) -> JournalResult<PathBuf> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(JournalError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}
