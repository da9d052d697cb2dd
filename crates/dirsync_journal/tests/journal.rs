//! End-to-end journal behavior on real files.

use dirsync_codec::{Action, Record};
use dirsync_journal::{
    ChangeListener, Directory, DirectoryId, DirectoryRegistry, JournalConfig, Version,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::fs::OpenOptions;
use std::sync::Arc;
use tempfile::TempDir;

fn config() -> JournalConfig {
    JournalConfig::new()
        .create_if_missing(true)
        .sync_on_append(false)
}

fn record(n: usize) -> Record {
    Record::new()
        .with_field("filename", format!("{n}.eml"))
        .with_field("descr", format!("message {n}"))
}

#[test]
fn appends_are_numbered_from_one() {
    let tmp = TempDir::new().unwrap();
    let dir = Directory::open(&tmp.path().join("d"), &config()).unwrap();
    let versions: Vec<u64> = (0..10)
        .map(|n| dir.append(Action::Add, &record(n)).unwrap().as_u64())
        .collect();
    assert_eq!(versions, (1..=10).collect::<Vec<_>>());
}

#[test]
fn torn_append_recovers_complete_patches() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("d");
    {
        let dir = Directory::open(&path, &config()).unwrap();
        for n in 0..3 {
            dir.append(Action::Add, &record(n)).unwrap();
        }
    }

    // Chop the last record in half, as if the process died mid-write.
    let log = path.join("00000000000000000001.log");
    let len = std::fs::metadata(&log).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&log)
        .unwrap()
        .set_len(len - 4)
        .unwrap();

    let dir = Directory::open(&path, &config()).unwrap();
    assert_eq!(dir.last_version(), Version::new(2));
    assert_eq!(dir.read(Version::new(2)).unwrap().record, record(1));
    assert_eq!(dir.append(Action::Add, &record(9)).unwrap(), Version::new(3));
    assert_eq!(dir.read(Version::new(3)).unwrap().record, record(9));
}

#[test]
fn partial_index_entry_is_dropped() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("d");
    {
        let dir = Directory::open(&path, &config()).unwrap();
        dir.append(Action::Add, &record(0)).unwrap();
    }

    let idx = path.join("00000000000000000001.idx");
    let mut bytes = std::fs::read(&idx).unwrap();
    bytes.extend_from_slice(&[0xaa; 5]);
    std::fs::write(&idx, bytes).unwrap();

    let dir = Directory::open(&path, &config()).unwrap();
    assert_eq!(dir.last_version(), Version::new(1));
    assert_eq!(std::fs::metadata(&idx).unwrap().len(), 8);
}

#[derive(Default)]
struct Seen(Mutex<Vec<u64>>);

impl ChangeListener for Seen {
    fn on_append(&self, _directory: DirectoryId, version: Version) {
        self.0.lock().push(version.as_u64());
    }
}

#[test]
fn listeners_see_appends_and_removals() {
    let tmp = TempDir::new().unwrap();
    let dir = Directory::open(&tmp.path().join("d"), &config()).unwrap();
    let seen = Arc::new(Seen::default());
    let id = dir.add_listener(seen.clone());
    assert_eq!(dir.listener_count(), 1);

    dir.append(Action::Add, &record(0)).unwrap();
    dir.remove(&record(0)).unwrap();
    dir.mark_removed(Version::new(1)).unwrap_err();

    assert!(dir.remove_listener(id));
    dir.append(Action::Add, &record(1)).unwrap();

    assert_eq!(*seen.0.lock(), vec![1, 2]);
    assert_eq!(dir.listener_count(), 0);
}

#[test]
fn concurrent_appends_stay_contiguous() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(
        Directory::open(&tmp.path().join("d"), &config().max_segment_patches(7)).unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let dir = Arc::clone(&dir);
            std::thread::spawn(move || {
                (0..25)
                    .map(|n| dir.append(Action::Add, &record(t * 100 + n)).unwrap().as_u64())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (1..=100).collect::<Vec<_>>());
    assert_eq!(dir.segment_count(), 15);
}

#[cfg(unix)]
#[test]
fn symlink_aliases_share_one_handle() {
    let tmp = TempDir::new().unwrap();
    let registry = DirectoryRegistry::new(tmp.path(), config());

    let real = registry.open("real", true).unwrap();
    std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("alias")).unwrap();
    let alias = registry.open("alias", false).unwrap();

    assert!(Arc::ptr_eq(&real, &alias));
    assert_eq!(registry.len(), 1);

    alias.append(Action::Add, &record(0)).unwrap();
    assert_eq!(real.last_version(), Version::new(1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn versions_contiguous_across_rotation(
        segment_size in 1u64..6,
        actions in proptest::collection::vec(any::<bool>(), 1..40),
    ) {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(
            &tmp.path().join("d"),
            &config().max_segment_patches(segment_size),
        )
        .unwrap();

        for (n, add) in actions.iter().enumerate() {
            let action = if *add { Action::Add } else { Action::Remove };
            let version = dir.append(action, &record(n)).unwrap();
            prop_assert_eq!(version.as_u64(), n as u64 + 1);
        }

        let segments = dir.segments().unwrap();
        let mut next = 1;
        for info in &segments {
            prop_assert_eq!(info.start.as_u64(), next);
            prop_assert!(info.count <= segment_size);
            next += info.count;
        }
        prop_assert_eq!(next - 1, actions.len() as u64);

        for (n, add) in actions.iter().enumerate() {
            let patch = dir.read(Version::new(n as u64 + 1)).unwrap();
            if *add {
                prop_assert_eq!(patch.action, Action::Add);
                prop_assert_eq!(patch.record, record(n));
            } else {
                prop_assert_eq!(patch.action, Action::Remove);
                prop_assert_eq!(patch.record, Record::tombstone(record(n).digest()));
            }
        }
    }
}
