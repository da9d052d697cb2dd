//! Dump command implementation.

use super::open_existing;
use dirsync_codec::encode_text;
use dirsync_journal::{Directory, Version};
use serde::Serialize;
use std::path::Path;

/// A patch as printed by `dirsync dump`.
#[derive(Debug, Serialize)]
pub struct PatchInfo {
    /// Version.
    pub version: u64,
    /// `+` or `-`.
    pub action: String,
    /// Record fields in order.
    pub fields: Vec<FieldInfo>,
}

/// One record field.
#[derive(Debug, Serialize)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: String,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    from: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let directory = open_existing(path)?;

    match format {
        "json" => {
            let patches = read_patches(&directory, from, limit)?;
            println!("{}", serde_json::to_string_pretty(&patches)?);
        }
        _ => {
            for version in versions(&directory, from, limit) {
                let patch = directory.read(version)?;
                println!("{} {}", patch.version, patch.action);
                print!("{}", encode_text(&patch.record)?);
            }
        }
    }

    Ok(())
}

fn versions(directory: &Directory, from: u64, limit: Option<usize>) -> impl Iterator<Item = Version> {
    let last = directory.last_version().as_u64();
    (from.max(1)..=last)
        .take(limit.unwrap_or(usize::MAX))
        .map(Version::new)
}

fn read_patches(
    directory: &Directory,
    from: u64,
    limit: Option<usize>,
) -> Result<Vec<PatchInfo>, Box<dyn std::error::Error>> {
    let mut patches = Vec::new();
    for version in versions(directory, from, limit) {
        let patch = directory.read(version)?;
        patches.push(PatchInfo {
            version: patch.version.as_u64(),
            action: patch.action.to_string(),
            fields: patch
                .record
                .fields()
                .map(|(name, value)| FieldInfo {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        });
    }
    Ok(patches)
}
