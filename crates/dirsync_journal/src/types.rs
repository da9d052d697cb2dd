//! Core type definitions.

use std::fmt;
use std::io;
use std::path::Path;

/// Per-directory patch version.
///
/// Versions start at 1, are assigned at append time, and are never reused.
/// `Version::ZERO` stands for "nothing committed yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(pub u64);

impl Version {
    /// The version of an empty directory.
    pub const ZERO: Self = Self(0);

    /// Creates a version.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Stable identity of a directory: device and inode of its storage.
///
/// Two names that reach the same storage through symlinks have the same
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirectoryId {
    /// Device number.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
}

impl DirectoryId {
    /// Resolves the identity of the directory at `path`, following symlinks.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from `stat`.
    #[cfg(unix)]
    pub fn of(path: &Path) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    /// Resolves the identity of the directory at `path`, following symlinks.
    ///
    /// Without inode numbers the identity is a hash of the canonical path.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from canonicalization.
    #[cfg(not(unix))]
    pub fn of(path: &Path) -> io::Result<Self> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let canonical = std::fs::canonicalize(path)?;
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Ok(Self {
            dev: 0,
            ino: hasher.finish(),
        })
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{}", self.dev, self.ino)
    }
}
