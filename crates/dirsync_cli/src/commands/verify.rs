//! Verify command implementation.
//!
//! Reads the segment files directly instead of opening the directory, so a
//! torn tail is reported rather than repaired.

use dirsync_codec::from_storage_bytes;
use dirsync_journal::{
    parse_index_file_name, segment_file_stem, INDEX_ENTRY_SIZE, TAG_ADD, TAG_REMOVE,
    TAG_REMOVED_ADD,
};
use dirsync_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segments checked.
    pub segments_checked: usize,
    /// Number of patches checked.
    pub patches_checked: u64,
    /// Number of patches that failed.
    pub corrupt_patches: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_patches == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying directory at {}", path.display());
    println!();

    let result = verify(path)?;
    println!("Segments checked: {}", result.segments_checked);
    println!("Patches checked:  {}", result.patches_checked);
    println!("Corrupt patches:  {}", result.corrupt_patches);
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Directory verification passed");
        Ok(())
    } else {
        println!("✗ Directory verification failed");
        Err("Verification failed".into())
    }
}

fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("no directory at {}", path.display()).into());
    }

    let mut starts = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let name = entry?.file_name();
        if let Some(start) = name.to_str().and_then(parse_index_file_name) {
            starts.push(start.as_u64());
        }
    }
    starts.sort_unstable();

    let mut result = VerifyResult::default();
    let mut expected = 1u64;
    for start in starts {
        if start != expected {
            result.errors.push(format!(
                "segment {start} does not follow version {}",
                expected - 1
            ));
        }
        let count = verify_segment(path, start, &mut result)?;
        result.segments_checked += 1;
        expected = start + count;
    }
    Ok(result)
}

/// Checks one segment and returns the number of complete index entries.
fn verify_segment(
    dir: &Path,
    start: u64,
    result: &mut VerifyResult,
) -> Result<u64, Box<dyn std::error::Error>> {
    let stem = segment_file_stem(start.into());
    let log_path = dir.join(format!("{stem}.log"));
    if !log_path.exists() {
        result.errors.push(format!("{stem}.idx has no log file"));
        return Ok(0);
    }
    let index = FileBackend::open(&dir.join(format!("{stem}.idx")))?;
    let log = FileBackend::open(&log_path)?;

    let index_size = index.size()?;
    if index_size % INDEX_ENTRY_SIZE != 0 {
        result.errors.push(format!(
            "{stem}.idx ends with a partial entry ({} stray bytes)",
            index_size % INDEX_ENTRY_SIZE
        ));
    }
    let count = index_size / INDEX_ENTRY_SIZE;
    let raw = index.read_at(0, (count * INDEX_ENTRY_SIZE) as usize)?;
    let offsets: Vec<u64> = raw
        .chunks_exact(INDEX_ENTRY_SIZE as usize)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            u64::from_le_bytes(bytes)
        })
        .collect();
    let log_size = log.size()?;

    for (i, &offset) in offsets.iter().enumerate() {
        let version = start + i as u64;
        result.patches_checked += 1;
        let end = offsets.get(i + 1).copied().unwrap_or(log_size);
        if let Err(message) = check_patch(&log, offset, end, log_size) {
            result.corrupt_patches += 1;
            result.errors.push(format!("version {version}: {message}"));
        }
    }
    Ok(count)
}

fn check_patch(log: &FileBackend, offset: u64, end: u64, log_size: u64) -> Result<(), String> {
    if end <= offset || end > log_size {
        return Err(format!("bad span {offset}..{end} in a log of {log_size} bytes"));
    }
    let bytes = log
        .read_at(offset, (end - offset) as usize)
        .map_err(|e| e.to_string())?;
    let (&tag, payload) = bytes.split_first().ok_or("empty patch")?;
    let record = from_storage_bytes(payload).map_err(|e| e.to_string())?;
    match tag {
        TAG_ADD | TAG_REMOVED_ADD => record.validate().map_err(|e| e.to_string()),
        TAG_REMOVE if record.is_tombstone() => Ok(()),
        TAG_REMOVE => Err("remove patch without a tombstone".into()),
        other => Err(format!("unknown tag {other:#04x}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_codec::{Action, Record};
    use dirsync_journal::{Directory, JournalConfig};
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn populated(tmp: &TempDir) -> std::path::PathBuf {
        let path = tmp.path().join("d");
        let config = JournalConfig::new()
            .create_if_missing(true)
            .sync_on_append(false)
            .max_segment_patches(2);
        let directory = Directory::open(&path, &config).unwrap();
        for n in 0..5 {
            let record = Record::new().with_field("filename", format!("{n}.eml"));
            directory.append(Action::Add, &record).unwrap();
        }
        directory
            .remove(&Record::new().with_field("filename", "1.eml"))
            .unwrap();
        path
    }

    #[test]
    fn healthy_directory_passes() {
        let tmp = TempDir::new().unwrap();
        let path = populated(&tmp);
        let result = verify(&path).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.segments_checked, 3);
        assert_eq!(result.patches_checked, 6);
    }

    #[test]
    fn torn_tail_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = populated(&tmp);
        let log = path.join(format!("{}.log", segment_file_stem(5.into())));
        let len = std::fs::metadata(&log).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&log)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let result = verify(&path).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.corrupt_patches, 1);
    }

    #[test]
    fn missing_segment_is_a_gap() {
        let tmp = TempDir::new().unwrap();
        let path = populated(&tmp);
        let stem = segment_file_stem(3.into());
        std::fs::remove_file(path.join(format!("{stem}.idx"))).unwrap();

        let result = verify(&path).unwrap();
        assert!(result.errors.iter().any(|e| e.contains("does not follow")));
    }
}
