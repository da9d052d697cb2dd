//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod serve;
pub mod verify;

use dirsync_journal::{Directory, JournalConfig};
use std::path::Path;

/// Opens an existing directory for reading.
fn open_existing(path: &Path) -> Result<Directory, Box<dyn std::error::Error>> {
    let config = JournalConfig::new().sync_on_append(false);
    Ok(Directory::open(path, &config)?)
}
