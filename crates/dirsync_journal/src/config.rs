//! Journal configuration.

/// Configuration for opening directories.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Number of patches after which a new segment is started.
    pub max_segment_patches: u64,

    /// Whether every append is synced to disk before its version is returned.
    pub sync_on_append: bool,

    /// Whether opening a missing directory creates it.
    pub create_if_missing: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            max_segment_patches: 2000,
            sync_on_append: true,
            create_if_missing: false,
        }
    }
}

impl JournalConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment rotation threshold (clamped to at least 1).
    #[must_use]
    pub const fn max_segment_patches(mut self, patches: u64) -> Self {
        self.max_segment_patches = if patches == 0 { 1 } else { patches };
        self
    }

    /// Sets whether appends are synced.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Sets whether missing directories are created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}
