//! The structured POSIX attribute record attached to every existing
//! filesystem entry, and its self-describing serialization.

use serde::{Deserialize, Serialize};

/// One record per existing filesystem entry.
///
/// Field order matches the reference encoding (`atime, ctime, gid, mode,
/// mtime, nlink, size, uid`) so that [`Metadata::encode`] is byte-for-byte
/// deterministic given the same field values; decoding is order-independent
/// because it goes through `serde_json`'s map-based `Deserialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub atime: i64,
    pub ctime: i64,
    pub gid: u32,
    pub mode: u32,
    pub mtime: i64,
    pub nlink: u32,
    pub size: u64,
    pub uid: u32,
}

/// Nominal directory size, mirroring a typical filesystem block size.
pub const DIRECTORY_SIZE: u64 = 4096;

impl Metadata {
    /// Builds a freshly-created record with all timestamps touched to now.
    pub fn new(mode: u32, uid: u32, gid: u32, size: u64) -> Metadata {
        let mut meta = Metadata {
            atime: 0,
            ctime: 0,
            gid,
            mode,
            mtime: 0,
            nlink: 1,
            size,
            uid,
        };
        meta.touch(true, true, true);
        meta
    }

    pub fn new_dir(mode: u32, uid: u32, gid: u32) -> Metadata {
        Metadata::new(mode | libc::S_IFDIR as u32, uid, gid, DIRECTORY_SIZE)
    }

    pub fn new_file(mode: u32, uid: u32, gid: u32, size: u64) -> Metadata {
        Metadata::new(mode | libc::S_IFREG as u32, uid, gid, size)
    }

    /// Lossless round-trip: `decode(encode(m)) == m`.
    pub fn encode(&self) -> Vec<u8> {
        // `serde_json` serializes struct fields in declaration order, so
        // this is deterministic for a given value.
        serde_json::to_vec(self).expect("Metadata serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Metadata, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn is_dir(&self) -> bool {
        (self.mode & libc::S_IFDIR as u32) == libc::S_IFDIR as u32
    }

    /// Sets the selected timestamps to the current wall-clock second.
    pub fn touch(&mut self, atime: bool, mtime: bool, ctime: bool) {
        let now = chrono::Utc::now().timestamp();
        if atime {
            self.atime = now;
        }
        if mtime {
            self.mtime = now;
        }
        if ctime {
            self.ctime = now;
        }
    }

    /// Projects this record into the conventional `stat(2)` attribute
    /// fields: `st_mode, st_size, st_uid, st_gid, st_nlink, st_atime,
    /// st_mtime, st_ctime`.
    pub fn to_stat(&self) -> Stat {
        Stat {
            st_mode: self.mode,
            st_size: self.size,
            st_uid: self.uid,
            st_gid: self.gid,
            st_nlink: self.nlink,
            st_atime: self.atime,
            st_mtime: self.mtime,
            st_ctime: self.ctime,
        }
    }
}

/// The attribute fields surfaced by `stat(2)`.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub st_mode: u32,
    pub st_size: u64,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_nlink: u32,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
}
