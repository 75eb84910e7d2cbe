//! Bridges the real, inode-addressed `fuser::Filesystem` trait to the
//! path-addressed [`Filesystem`](super::Filesystem) above. Kernel
//! dispatch and the inode table are deliberately thin: every call here
//! resolves an inode to a path (or vice versa) and delegates straight
//! through.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem as FuseFilesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use parking_lot::Mutex;

use crate::error::posix_errno;
use crate::metadata::Stat;
use crate::path;
use crate::store::Store;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INODE: u64 = 1;

struct Inodes {
    path_to_ino: HashMap<String, u64>,
    ino_to_path: HashMap<u64, String>,
    next: u64,
}

impl Inodes {
    fn new() -> Inodes {
        let mut ino_to_path = HashMap::new();
        let mut path_to_ino = HashMap::new();
        ino_to_path.insert(ROOT_INODE, "/".to_string());
        path_to_ino.insert("/".to_string(), ROOT_INODE);
        Inodes { path_to_ino, ino_to_path, next: ROOT_INODE + 1 }
    }

    fn ino_for(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.path_to_ino.get(path) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.path_to_ino.insert(path.to_string(), ino);
        self.ino_to_path.insert(ino, path.to_string());
        ino
    }

    fn path_for(&self, ino: u64) -> Option<String> {
        self.ino_to_path.get(&ino).cloned()
    }

    fn forget(&mut self, path: &str) {
        if let Some(ino) = self.path_to_ino.remove(path) {
            self.ino_to_path.remove(&ino);
        }
    }
}

pub struct FuseAdapter<S: Store> {
    inner: super::Filesystem<S>,
    inodes: Mutex<Inodes>,
}

impl<S: Store> FuseAdapter<S> {
    pub fn new(inner: super::Filesystem<S>) -> FuseAdapter<S> {
        inner.init().expect("failed to initialize root directory");
        FuseAdapter { inner, inodes: Mutex::new(Inodes::new()) }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let name = name.to_str()?;
        let parent_path = self.inodes.lock().path_for(parent)?;
        Some(path::join(&parent_path, name))
    }

    fn stat_to_attr(ino: u64, stat: Stat) -> FileAttr {
        let kind = if stat.st_mode & libc::S_IFDIR as u32 == libc::S_IFDIR as u32 {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        let to_time = |secs: i64| UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
        FileAttr {
            ino,
            size: stat.st_size,
            blocks: stat.st_size.div_ceil(512),
            atime: to_time(stat.st_atime),
            mtime: to_time(stat.st_mtime),
            ctime: to_time(stat.st_ctime),
            crtime: to_time(stat.st_ctime),
            kind,
            perm: (stat.st_mode & 0o7777) as u16,
            nlink: stat.st_nlink,
            uid: stat.st_uid,
            gid: stat.st_gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }
}

impl<S: Store> FuseFilesystem for FuseAdapter<S> {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.getattr(&child) {
            Ok(stat) => {
                let ino = self.inodes.lock().ino_for(&child);
                reply.entry(&TTL, &Self::stat_to_attr(ino, stat), 0);
            }
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.inodes.lock().path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.getattr(&path) {
            Ok(stat) => reply.attr(&TTL, &Self::stat_to_attr(ino, stat)),
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.inodes.lock().path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let names = match self.inner.readdir(&path) {
            Ok(names) => names,
            Err(err) => {
                reply.error(posix_errno(&err));
                return;
            }
        };
        for (i, name) in names.into_iter().enumerate().skip(offset as usize) {
            let child_path = match name.as_str() {
                "." => path.clone(),
                ".." => path::split(&path).0.to_string(),
                name => path::join(&path, name),
            };
            let child_ino = self.inodes.lock().ino_for(&child_path);
            let kind = match self.inner.getattr(&child_path) {
                Ok(stat) if stat.is_dir() => FileType::Directory,
                _ => FileType::RegularFile,
            };
            if reply.add(child_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.mkdir(&child, mode).and_then(|()| self.inner.getattr(&child)) {
            Ok(stat) => {
                let ino = self.inodes.lock().ino_for(&child);
                reply.entry(&TTL, &Self::stat_to_attr(ino, stat), 0);
            }
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.create(&child, mode).and_then(|handle| Ok((handle, self.inner.getattr(&child)?))) {
            Ok((handle, stat)) => {
                let ino = self.inodes.lock().ino_for(&child);
                reply.created(&TTL, &Self::stat_to_attr(ino, stat), 0, handle, 0);
            }
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.lock().path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.open(&path, flags) {
            Ok(handle) => reply.opened(handle, 0),
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inner.handle_path(fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match self.inner.read(&path, size as usize, offset as usize) {
            Ok(Some(data)) => reply.data(&data),
            Ok(None) => reply.error(libc::ENOENT),
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.inner.handle_path(fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match self.inner.write(&path, data, offset as usize) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.unlink(&child) {
            Ok(()) => {
                self.inodes.lock().forget(&child);
                reply.ok();
            }
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.rmdir(&child) {
            Ok(()) => {
                self.inodes.lock().forget(&child);
                reply.ok();
            }
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(old), Some(new)) = (self.child_path(parent, name), self.child_path(newparent, newname)) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.rename(&old, &new) {
            Ok(()) => {
                self.inodes.lock().forget(&old);
                reply.ok();
            }
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.inner.release(fh);
        reply.ok();
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.inner.handle_path(fh) {
            Some(path) => match self.inner.flush(&path) {
                Ok(()) => reply.ok(),
                Err(err) => reply.error(posix_errno(&err)),
            },
            None => reply.error(libc::EBADF),
        }
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.inner.handle_path(fh) {
            Some(path) => match self.inner.fsync(&path) {
                Ok(()) => reply.ok(),
                Err(err) => reply.error(posix_errno(&err)),
            },
            None => reply.error(libc::EBADF),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, _mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.inodes.lock().path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.inner.access(&path) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(posix_errno(&err)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.lock().path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = (|| {
            if let Some(mode) = mode {
                self.inner.chmod(&path, mode)?;
            }
            if uid.is_some() || gid.is_some() {
                let stat = self.inner.getattr(&path)?;
                self.inner.chown(&path, uid.unwrap_or(stat.st_uid), gid.unwrap_or(stat.st_gid))?;
            }
            if let Some(size) = size {
                self.inner.truncate(&path, size)?;
            }
            if mode.is_none() && uid.is_none() && gid.is_none() && size.is_none() {
                self.inner.utimens(&path)?;
            }
            self.inner.getattr(&path)
        })();
        match result {
            Ok(stat) => reply.attr(&TTL, &Self::stat_to_attr(ino, stat)),
            Err(err) => reply.error(posix_errno(&err)),
        }
    }
}

impl Stat {
    fn is_dir(&self) -> bool {
        self.st_mode & libc::S_IFDIR as u32 == libc::S_IFDIR as u32
    }
}
