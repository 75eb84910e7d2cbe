//! Translates each filesystem operation into one bounded STM transaction
//! (or, for `ensure_file`, a single idempotent CAS multi-op), enforces
//! path/name invariants, and owns the open-handle table.

pub mod handles;
pub mod fuse_adapter;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{FfsError, Result};
use crate::metadata::{Metadata, Stat};
use crate::path;
use crate::store::{Compare, Deadline, Op, Store, Txn, Witness};
use crate::stm::{self, Stm};
use handles::HandleTable;

/// Default open-flag bit meaning "create if missing", matching `libc::O_CREAT`.
pub const O_CREAT: i32 = libc::O_CREAT;

/// Ambient configuration: retry bound, uid/gid defaults, handle-table
/// capacity, and per-call timeout — everything a real deployment needs
/// to tune beyond the hardcoded defaults.
#[derive(Debug, Clone)]
pub struct FsOptions {
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub call_timeout: Duration,
    pub max_open_handles: usize,
    pub default_uid: u32,
    pub default_gid: u32,
}

impl Default for FsOptions {
    fn default() -> FsOptions {
        FsOptions {
            max_retries: stm::DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::ZERO,
            call_timeout: Duration::from_secs(30),
            max_open_handles: 1024,
            default_uid: 1000,
            default_gid: 1000,
        }
    }
}

/// The filesystem adapter itself: one per mount, shared (behind `Arc`)
/// with whatever dispatch layer drives it.
pub struct Filesystem<S: Store> {
    store: Arc<S>,
    handles: Mutex<HandleTable>,
    options: FsOptions,
}

impl<S: Store> Filesystem<S> {
    pub fn new(store: Arc<S>, options: FsOptions) -> Filesystem<S> {
        let handles = Mutex::new(HandleTable::new(options.max_open_handles));
        Filesystem { store, handles, options }
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.options.call_timeout)
    }

    fn run<T>(
        &self,
        prefetch: &[String],
        body: impl FnMut(&mut Stm<S>) -> Result<T>,
    ) -> Result<T> {
        stm::run_with_retry(
            self.store.as_ref(),
            self.deadline(),
            self.options.max_retries,
            self.options.retry_backoff,
            prefetch,
            body,
        )
    }

    /// Idempotent create CAS: bypasses the STM engine entirely and issues
    /// one multi-op directly.
    /// Returns whether this call was the one that created the entry.
    fn ensure_file(&self, path: &str, is_dir: bool, mode: u32, content: &[u8]) -> Result<bool> {
        path::validate_path(path)?;
        let meta = if is_dir {
            Metadata::new_dir(mode, self.options.default_uid, self.options.default_gid)
        } else {
            Metadata::new_file(
                mode,
                self.options.default_uid,
                self.options.default_gid,
                content.len() as u64,
            )
        };
        let mkey = path::meta_key(path);
        let dkey = path::data_key(path);

        let mut compare = vec![Compare { key: mkey.clone(), expect: Witness::NeverCreated }];
        let mut success = vec![Op::Put { key: mkey, value: meta.encode() }];
        if !is_dir {
            compare.push(Compare { key: dkey.clone(), expect: Witness::NeverCreated });
            success.push(Op::Put { key: dkey, value: content.to_vec() });
        }

        let resp = self.store.txn(Txn { compare, success, failure: vec![] }, self.deadline())?;
        Ok(resp.succeeded)
    }

    /// Idempotent; ensures the root directory exists. Called exactly once
    /// before any other operation.
    pub fn init(&self) -> Result<()> {
        self.ensure_file("/", true, 0o777, &[])?;
        Ok(())
    }

    pub fn getattr(&self, path: &str) -> Result<Stat> {
        path::validate_path(path)?;
        let entry = self.store.get(&path::meta_key(path), self.deadline())?;
        let bytes = entry.value.ok_or_else(|| FfsError::NotFound(path.to_string()))?;
        let meta = Metadata::decode(&bytes).map_err(|source| FfsError::Corrupt { path: path.to_string(), source })?;
        Ok(meta.to_stat())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let entry = self.store.get(&path::meta_key(path), self.deadline())?;
        Ok(entry.value.is_some())
    }

    /// Yields `.`, `..`, then every direct child of `path`: a raw prefix
    /// scan over the metadata namespace, filtered to direct children by
    /// re-splitting each hit's parent.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        path::validate_path(path)?;
        let norm = if path == "/" { "/".to_string() } else { path.trim_end_matches('/').to_string() };
        let prefix = path::meta_key(&norm);
        let hits = self.store.get_prefix(&prefix, true, 0, self.deadline())?;

        let mut names = vec![".".to_string(), "..".to_string()];
        for hit in hits {
            let child_path = path::path_from_meta_key(&hit.key);
            let (parent, name) = path::split(&child_path);
            if parent == norm && !name.is_empty() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        path::validate_path(path)?;
        if self.ensure_file(path, true, mode, &[])? {
            Ok(())
        } else {
            Err(FfsError::AlreadyExists(path.to_string()))
        }
    }

    pub fn create(&self, path: &str, mode: u32) -> Result<u64> {
        path::validate_path(path)?;
        if !self.ensure_file(path, false, mode, &[])? {
            return Err(FfsError::AlreadyExists(path.to_string()));
        }
        self.handles.lock().allocate(path.to_string(), O_CREAT)
    }

    /// Creates only when `flags` carries `O_CREAT`; otherwise requires the
    /// path to already exist.
    pub fn open(&self, path: &str, flags: i32) -> Result<u64> {
        path::validate_path(path)?;
        if flags & O_CREAT != 0 {
            self.ensure_file(path, false, 0o644, &[])?;
        } else if !self.exists(path)? {
            return Err(FfsError::NotFound(path.to_string()));
        }
        self.handles.lock().allocate(path.to_string(), flags)
    }

    pub fn read(&self, path: &str, length: usize, offset: usize) -> Result<Option<Vec<u8>>> {
        path::validate_path(path)?;
        let mkey = path::meta_key(path);
        let dkey = path::data_key(path);
        self.run(&[mkey.clone(), dkey.clone()], |tx| {
            let data = match tx.get(&dkey)? {
                Some(data) => data,
                None => return Ok(None),
            };
            let meta_bytes = tx
                .get(&mkey)?
                .ok_or_else(|| FfsError::NotFound(path.to_string()))?;
            let mut meta = Metadata::decode(&meta_bytes)
                .map_err(|source| FfsError::Corrupt { path: path.to_string(), source })?;
            meta.touch(true, false, false);
            tx.put(&mkey, meta.encode());

            let start = offset.min(data.len());
            let end = offset.saturating_add(length).min(data.len());
            Ok(Some(data[start..end].to_vec()))
        })
    }

    /// Writes `buf` at `offset`, zero-filling any gap past the current
    /// payload length, matching `truncate`'s grow semantics.
    pub fn write(&self, path: &str, buf: &[u8], offset: usize) -> Result<usize> {
        path::validate_path(path)?;
        let mkey = path::meta_key(path);
        let dkey = path::data_key(path);
        let written = buf.len();
        self.run(&[mkey.clone(), dkey.clone()], |tx| {
            let meta_bytes = tx
                .get(&mkey)?
                .ok_or_else(|| FfsError::NotFound(path.to_string()))?;
            let mut meta = Metadata::decode(&meta_bytes)
                .map_err(|source| FfsError::Corrupt { path: path.to_string(), source })?;
            let mut data = tx.get(&dkey)?.unwrap_or_default();

            let end = offset + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset..end].copy_from_slice(buf);

            meta.size = meta.size.max(end as u64);
            meta.touch(true, true, true);
            tx.put(&mkey, meta.encode());
            tx.put(&dkey, data);
            Ok(())
        })?;
        Ok(written)
    }

    pub fn truncate(&self, path: &str, length: u64) -> Result<()> {
        path::validate_path(path)?;
        let mkey = path::meta_key(path);
        let dkey = path::data_key(path);
        self.run(&[mkey.clone(), dkey.clone()], |tx| {
            let meta_bytes = tx
                .get(&mkey)?
                .ok_or_else(|| FfsError::NotFound(path.to_string()))?;
            let mut meta = Metadata::decode(&meta_bytes)
                .map_err(|source| FfsError::Corrupt { path: path.to_string(), source })?;
            let mut data = tx.get(&dkey)?.unwrap_or_default();

            data.resize(length as usize, 0);
            meta.size = length;
            meta.touch(true, true, true);
            tx.put(&mkey, meta.encode());
            tx.put(&dkey, data);
            Ok(())
        })
    }

    /// Idempotent when the target is already missing.
    pub fn unlink(&self, path: &str) -> Result<()> {
        path::validate_path(path)?;
        let mkey = path::meta_key(path);
        let dkey = path::data_key(path);
        self.run(&[], |tx| {
            tx.delete(&mkey);
            tx.delete(&dkey);
            Ok(())
        })
    }

    /// Fails `ENOTDIR` if the target is a file, `ENOTEMPTY` if it has
    /// children, checked via a bounded, limit-1 prefix probe.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        path::validate_path(path)?;
        let mkey = path::meta_key(path);
        let child_prefix = if path == "/" { mkey.clone() } else { format!("{mkey}/") };
        self.run(&[mkey.clone()], |tx| {
            let meta_bytes = tx
                .get(&mkey)?
                .ok_or_else(|| FfsError::NotFound(path.to_string()))?;
            let meta = Metadata::decode(&meta_bytes)
                .map_err(|source| FfsError::Corrupt { path: path.to_string(), source })?;
            if !meta.is_dir() {
                return Err(FfsError::NotADirectory(path.to_string()));
            }
            let probe = self.store.get_prefix(&child_prefix, true, 1, self.deadline())?;
            if !probe.is_empty() {
                return Err(FfsError::NotEmpty(path.to_string()));
            }
            tx.delete(&mkey);
            Ok(())
        })
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        path::validate_path(old)?;
        path::validate_path(new)?;
        let old_mkey = path::meta_key(old);
        let old_dkey = path::data_key(old);
        let new_mkey = path::meta_key(new);
        let new_dkey = path::data_key(new);
        self.run(&[old_mkey.clone(), old_dkey.clone()], |tx| {
            let meta_bytes = tx
                .get(&old_mkey)?
                .ok_or_else(|| FfsError::NotFound(old.to_string()))?;
            let mut meta = Metadata::decode(&meta_bytes)
                .map_err(|source| FfsError::Corrupt { path: old.to_string(), source })?;
            let data = tx.get(&old_dkey)?;
            meta.touch(false, false, true);
            tx.delete(&old_mkey);
            tx.delete(&old_dkey);
            tx.put(&new_mkey, meta.encode());
            if let Some(data) = data {
                tx.put(&new_dkey, data);
            }
            Ok(())
        })
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        path::validate_path(path)?;
        let mkey = path::meta_key(path);
        self.run(&[mkey.clone()], |tx| {
            let meta_bytes = tx
                .get(&mkey)?
                .ok_or_else(|| FfsError::NotFound(path.to_string()))?;
            let mut meta = Metadata::decode(&meta_bytes)
                .map_err(|source| FfsError::Corrupt { path: path.to_string(), source })?;
            meta.mode = mode;
            meta.touch(false, false, true);
            tx.put(&mkey, meta.encode());
            Ok(())
        })
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        path::validate_path(path)?;
        let mkey = path::meta_key(path);
        self.run(&[mkey.clone()], |tx| {
            let meta_bytes = tx
                .get(&mkey)?
                .ok_or_else(|| FfsError::NotFound(path.to_string()))?;
            let mut meta = Metadata::decode(&meta_bytes)
                .map_err(|source| FfsError::Corrupt { path: path.to_string(), source })?;
            meta.uid = uid;
            meta.gid = gid;
            meta.touch(false, false, true);
            tx.put(&mkey, meta.encode());
            Ok(())
        })
    }

    /// `access` carries no permission-bit enforcement; it only checks
    /// existence.
    pub fn access(&self, path: &str) -> Result<()> {
        path::validate_path(path)?;
        if self.exists(path)? {
            Ok(())
        } else {
            Err(FfsError::NotFound(path.to_string()))
        }
    }

    /// No-op beyond the existence check; this system does not track
    /// sub-second or externally-supplied timestamps.
    pub fn utimens(&self, path: &str) -> Result<()> {
        self.access(path)
    }

    pub fn flush(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    pub fn fsync(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    pub fn release(&self, handle: u64) {
        self.handles.lock().release(handle);
    }

    pub fn handle_path(&self, handle: u64) -> Option<String> {
        self.handles.lock().get(handle).map(|f| f.path.clone())
    }

    pub fn readlink(&self, _path: &str) -> Result<String> {
        Err(FfsError::NotImplemented)
    }

    pub fn mknod(&self, _path: &str) -> Result<()> {
        Err(FfsError::NotImplemented)
    }

    pub fn symlink(&self, _name: &str, _target: &str) -> Result<()> {
        Err(FfsError::NotImplemented)
    }

    pub fn link(&self, _target: &str, _name: &str) -> Result<()> {
        Err(FfsError::NotImplemented)
    }

    pub fn statfs(&self, _path: &str) -> Result<()> {
        Err(FfsError::NotImplemented)
    }

    pub fn chflags(&self, _path: &str) -> Result<()> {
        Err(FfsError::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;

    fn fs() -> Filesystem<MemStore> {
        let fs = Filesystem::new(Arc::new(MemStore::new()), FsOptions::default());
        fs.init().unwrap();
        fs
    }

    #[test]
    fn scenario_create_write_read() {
        let fs = fs();
        fs.create("/foo", 0o644).unwrap();
        let written = fs.write("/foo", b"bar", 0).unwrap();
        assert_eq!(written, 3);
        assert_eq!(fs.read("/foo", 3, 0).unwrap(), Some(b"bar".to_vec()));
        assert_eq!(fs.getattr("/foo").unwrap().st_size, 3);
    }

    #[test]
    fn scenario_readdir_root() {
        let fs = fs();
        let names: std::collections::HashSet<_> = fs.readdir("/").unwrap().into_iter().collect();
        assert_eq!(names, [".", ".."].iter().map(|s| s.to_string()).collect());

        fs.create("/a", 0o644).unwrap();
        fs.create("/b", 0o644).unwrap();
        let names: std::collections::HashSet<_> = fs.readdir("/").unwrap().into_iter().collect();
        assert_eq!(
            names,
            [".", "..", "a", "b"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn readdir_excludes_grandchildren() {
        let fs = fs();
        fs.mkdir("/a", 0o755).unwrap();
        fs.create("/a/b", 0o644).unwrap();
        let names: std::collections::HashSet<_> = fs.readdir("/").unwrap().into_iter().collect();
        assert!(!names.contains("b"));
        let names: std::collections::HashSet<_> = fs.readdir("/a").unwrap().into_iter().collect();
        assert!(names.contains("b"));
    }

    #[test]
    fn scenario_truncate_shrink() {
        let fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", b"hello", 0).unwrap();
        fs.truncate("/f", 2).unwrap();
        assert_eq!(fs.read("/f", 10, 0).unwrap(), Some(b"he".to_vec()));
        assert_eq!(fs.getattr("/f").unwrap().st_size, 2);
    }

    #[test]
    fn scenario_truncate_grow_zero_fills() {
        let fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", b"hello", 0).unwrap();
        fs.truncate("/f", 8).unwrap();
        assert_eq!(fs.read("/f", 8, 0).unwrap(), Some(b"hello\0\0\0".to_vec()));
        assert_eq!(fs.getattr("/f").unwrap().st_size, 8);
    }

    #[test]
    fn scenario_rename() {
        let fs = fs();
        fs.create("/foo", 0o644).unwrap();
        fs.write("/foo", b"bar", 0).unwrap();
        fs.rename("/foo", "/baz").unwrap();
        assert_eq!(fs.read("/baz", 3, 0).unwrap(), Some(b"bar".to_vec()));
        assert!(matches!(fs.getattr("/foo"), Err(FfsError::NotFound(_))));
    }

    #[test]
    fn create_is_exclusive() {
        let fs = fs();
        fs.create("/foo", 0o644).unwrap();
        assert!(matches!(fs.create("/foo", 0o644), Err(FfsError::AlreadyExists(_))));
    }

    #[test]
    fn open_is_idempotent() {
        let fs = fs();
        fs.open("/foo", O_CREAT).unwrap();
        fs.open("/foo", O_CREAT).unwrap();
        assert_eq!(fs.getattr("/foo").unwrap().st_size, 0);
    }

    #[test]
    fn open_without_creat_on_missing_path_fails() {
        let fs = fs();
        assert!(matches!(fs.open("/nonexistent", 0), Err(FfsError::NotFound(_))));
    }

    #[test]
    fn name_too_long_rejected() {
        let fs = fs();
        let long = "a".repeat(256);
        let path = format!("/{long}");
        assert!(matches!(fs.create(&path, 0o644), Err(FfsError::NameTooLong(_))));
    }

    #[test]
    fn rmdir_rejects_file() {
        let fs = fs();
        fs.create("/f", 0o644).unwrap();
        assert!(matches!(fs.rmdir("/f"), Err(FfsError::NotADirectory(_))));
    }

    #[test]
    fn rmdir_rejects_non_empty() {
        let fs = fs();
        fs.mkdir("/a", 0o755).unwrap();
        fs.create("/a/b", 0o644).unwrap();
        assert!(matches!(fs.rmdir("/a"), Err(FfsError::NotEmpty(_))));
        fs.unlink("/a/b").unwrap();
        fs.rmdir("/a").unwrap();
    }

    #[test]
    fn unlink_is_idempotent() {
        let fs = fs();
        fs.unlink("/nonexistent").unwrap();
        fs.create("/f", 0o644).unwrap();
        fs.unlink("/f").unwrap();
        fs.unlink("/f").unwrap();
    }

    #[test]
    fn sparse_write_zero_fills_gap() {
        let fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", b"end", 5).unwrap();
        assert_eq!(fs.read("/f", 8, 0).unwrap(), Some(b"\0\0\0\0\0end".to_vec()));
    }

    #[test]
    fn chmod_and_chown_on_missing_path_fail_enoent() {
        let fs = fs();
        assert!(matches!(fs.chmod("/missing", 0o600), Err(FfsError::NotFound(_))));
        assert!(matches!(fs.chown("/missing", 1, 1), Err(FfsError::NotFound(_))));
    }

    #[test]
    fn access_and_utimens_on_missing_path_fail_enoent() {
        let fs = fs();
        assert!(matches!(fs.access("/missing"), Err(FfsError::NotFound(_))));
        assert!(matches!(fs.utimens("/missing"), Err(FfsError::NotFound(_))));
    }

    #[test]
    fn unimplemented_ops_report_enosys() {
        let fs = fs();
        assert!(matches!(fs.readlink("/x"), Err(FfsError::NotImplemented)));
        assert!(matches!(fs.symlink("/x", "/y"), Err(FfsError::NotImplemented)));
        assert!(matches!(fs.statfs("/"), Err(FfsError::NotImplemented)));
    }

    #[test]
    fn handle_table_exhaustion() {
        let fs = Filesystem::new(
            Arc::new(MemStore::new()),
            FsOptions { max_open_handles: 1, ..FsOptions::default() },
        );
        fs.init().unwrap();
        fs.open("/a", O_CREAT).unwrap();
        assert!(matches!(fs.open("/b", O_CREAT), Err(FfsError::HandleExhausted)));
    }
}
