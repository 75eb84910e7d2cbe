use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ffs::error::FfsError;
use ffs::store::mem::MemStore;
use ffs::store::{Deadline, Op, Store, Txn};
use ffs::stm::{self, Stm};
use ffs::{Filesystem, FsOptions};
use tempfile::tempdir;

fn fresh_fs() -> Filesystem<MemStore> {
    let _ = env_logger::try_init();
    let fs = Filesystem::new(Arc::new(MemStore::new()), FsOptions::default());
    fs.init().unwrap();
    fs
}

#[test]
fn full_lifecycle_create_write_read_rename_unlink() {
    let fs = fresh_fs();

    fs.mkdir("/docs", 0o755).unwrap();
    fs.create("/docs/readme.txt", 0o644).unwrap();
    fs.write("/docs/readme.txt", b"hello, world", 0).unwrap();
    assert_eq!(
        fs.read("/docs/readme.txt", 64, 0).unwrap(),
        Some(b"hello, world".to_vec())
    );

    fs.rename("/docs/readme.txt", "/docs/README.txt").unwrap();
    assert!(matches!(fs.getattr("/docs/readme.txt"), Err(FfsError::NotFound(_))));
    assert_eq!(
        fs.read("/docs/README.txt", 64, 0).unwrap(),
        Some(b"hello, world".to_vec())
    );

    fs.unlink("/docs/README.txt").unwrap();
    fs.rmdir("/docs").unwrap();
    assert!(matches!(fs.getattr("/docs"), Err(FfsError::NotFound(_))));
}

#[test]
fn directory_tree_listing_reflects_structure() {
    let fs = fresh_fs();
    fs.mkdir("/a", 0o755).unwrap();
    fs.mkdir("/a/b", 0o755).unwrap();
    fs.create("/a/b/c.txt", 0o644).unwrap();
    fs.create("/a/sibling.txt", 0o644).unwrap();

    let root: std::collections::HashSet<_> = fs.readdir("/").unwrap().into_iter().collect();
    assert_eq!(root, [".", "..", "a"].iter().map(|s| s.to_string()).collect());

    let a: std::collections::HashSet<_> = fs.readdir("/a").unwrap().into_iter().collect();
    assert_eq!(a, [".", "..", "b", "sibling.txt"].iter().map(|s| s.to_string()).collect());

    let b: std::collections::HashSet<_> = fs.readdir("/a/b").unwrap().into_iter().collect();
    assert_eq!(b, [".", "..", "c.txt"].iter().map(|s| s.to_string()).collect());
}

/// Exercises the STM engine's conflict-and-retry guarantee directly: many
/// threads incrementing the same key through independent transactions
/// must never lose an update. `Filesystem`'s own per-call operations each
/// commit in one transaction, so this drives `run_with_retry` the way
/// `Filesystem` does internally, just with a read-modify-write body.
#[test]
fn concurrent_counter_increments_never_lose_an_update() {
    let _ = env_logger::try_init();
    let store = Arc::new(MemStore::new());
    store
        .txn(
            Txn {
                compare: vec![],
                success: vec![Op::Put { key: "meta/counter".to_string(), value: b"0".to_vec() }],
                failure: vec![],
            },
            Deadline::None,
        )
        .unwrap();

    let mut handles = vec![];
    for _ in 0..8 {
        let store = store.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..25 {
                stm::run_with_retry(
                    store.as_ref(),
                    Deadline::None,
                    stm::DEFAULT_MAX_RETRIES * 4,
                    Duration::ZERO,
                    &[],
                    |tx: &mut Stm<MemStore>| {
                        let current = tx.get("meta/counter")?.unwrap();
                        let n: u64 = std::str::from_utf8(&current).unwrap().parse().unwrap();
                        tx.put("meta/counter", (n + 1).to_string().into_bytes());
                        Ok(())
                    },
                )
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let final_value = store.get("meta/counter", Deadline::None).unwrap().value.unwrap();
    let n: u64 = std::str::from_utf8(&final_value).unwrap().parse().unwrap();
    assert_eq!(n, 200);
}

#[test]
fn name_too_long_is_rejected_before_touching_the_store() {
    let fs = fresh_fs();
    let long_name = "x".repeat(300);
    let path = format!("/{long_name}");
    assert!(matches!(fs.create(&path, 0o644), Err(FfsError::NameTooLong(_))));
    assert!(matches!(fs.getattr(&path), Err(FfsError::NameTooLong(_))));
}

#[test]
fn open_without_o_creat_never_materializes_a_path() {
    let fs = fresh_fs();
    assert!(matches!(fs.open("/ghost", 0), Err(FfsError::NotFound(_))));
    assert!(matches!(fs.getattr("/ghost"), Err(FfsError::NotFound(_))));
}

#[test]
fn fuse_adapter_initializes_root_without_mounting() {
    // A real mount requires a FUSE-capable kernel and elevated privileges
    // neither of which this suite assumes; this only exercises adapter
    // construction against a throwaway mountpoint directory.
    let mountpoint = tempdir().unwrap();
    let fs = fresh_fs();
    let _adapter = ffs::fs::fuse_adapter::FuseAdapter::new(fs);
    assert!(mountpoint.path().exists());
}
