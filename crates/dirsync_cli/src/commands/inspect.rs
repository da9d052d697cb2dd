//! Inspect command implementation.

use super::open_existing;
use dirsync_codec::Action;
use dirsync_journal::{segment_file_stem, Directory, Version};
use serde::Serialize;
use std::path::Path;

/// Directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// Storage identity.
    pub id: String,
    /// Last committed version.
    pub last_version: u64,
    /// Live adds.
    pub live_records: usize,
    /// Remove patches and removed adds.
    pub removals: usize,
    /// Bytes across all segment files.
    pub total_bytes: u64,
    /// Per-segment details.
    pub segments: Vec<SegmentStats>,
}

/// Statistics for a single segment.
#[derive(Debug, Serialize)]
pub struct SegmentStats {
    /// File stem shared by the index and log.
    pub file: String,
    /// First version.
    pub start: u64,
    /// Number of patches.
    pub count: u64,
    /// Index file size.
    pub index_bytes: u64,
    /// Log file size.
    pub log_bytes: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let directory = open_existing(path)?;
    let result = inspect(&directory)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(directory: &Directory) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let segments: Vec<SegmentStats> = directory
        .segments()?
        .into_iter()
        .map(|info| SegmentStats {
            file: segment_file_stem(info.start),
            start: info.start.as_u64(),
            count: info.count,
            index_bytes: info.index_bytes,
            log_bytes: info.log_bytes,
        })
        .collect();

    let mut live_records = 0;
    let mut removals = 0;
    for v in 1..=directory.last_version().as_u64() {
        match directory.read(Version::new(v))?.action {
            Action::Add => live_records += 1,
            Action::Remove => removals += 1,
        }
    }

    Ok(InspectResult {
        path: directory.path().display().to_string(),
        id: directory.id().to_string(),
        last_version: directory.last_version().as_u64(),
        live_records,
        removals,
        total_bytes: segments.iter().map(|s| s.index_bytes + s.log_bytes).sum(),
        segments,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("dirsync Directory Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!("Id:   {}", result.id);
    println!();
    println!("Patches:");
    println!("  Last version: {}", result.last_version);
    println!("  Live records: {}", result.live_records);
    println!("  Removals:     {}", result.removals);
    println!();
    println!("Storage: {}", format_size(result.total_bytes));
    for segment in &result.segments {
        println!(
            "  {}  versions {}..{}  idx {}  log {}",
            segment.file,
            segment.start,
            segment.start + segment.count,
            format_size(segment.index_bytes),
            format_size(segment.log_bytes)
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_codec::Record;
    use dirsync_journal::JournalConfig;
    use tempfile::TempDir;

    #[test]
    fn counts_live_and_removed() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig::new()
            .create_if_missing(true)
            .sync_on_append(false)
            .max_segment_patches(2);
        let directory = Directory::open(&tmp.path().join("d"), &config).unwrap();
        for name in ["a", "b", "c"] {
            let record = Record::new().with_field("filename", name);
            directory.append(Action::Add, &record).unwrap();
        }
        directory
            .remove(&Record::new().with_field("filename", "b"))
            .unwrap();

        let result = inspect(&directory).unwrap();
        assert_eq!(result.last_version, 4);
        assert_eq!(result.live_records, 2);
        assert_eq!(result.removals, 2);
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].start, 3);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["segments"][0]["file"], "00000000000000000001");
    }

    #[test]
    fn sizes_are_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KiB");
    }
}
