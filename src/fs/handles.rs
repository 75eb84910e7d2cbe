//! A fixed-capacity, process-local map from a small integer handle to
//! `(path, open-flags)`. Single-threaded callers need no locking of their
//! own; [`Filesystem`](super::Filesystem) wraps this in a
//! `parking_lot::Mutex` so the struct stays safe to share if the adapter
//! is ever driven from more than one thread.

use crate::error::{FfsError, Result};

#[derive(Debug, Clone)]
pub struct OpenFile {
    pub path: String,
    pub flags: i32,
}

pub struct HandleTable {
    slots: Vec<Option<OpenFile>>,
}

impl HandleTable {
    pub fn new(capacity: usize) -> HandleTable {
        HandleTable {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Scans for the first free slot; `ENFILE`-equivalent if none remain.
    pub fn allocate(&mut self, path: String, flags: i32) -> Result<u64> {
        match self.slots.iter().position(Option::is_none) {
            Some(idx) => {
                self.slots[idx] = Some(OpenFile { path, flags });
                Ok(idx as u64)
            }
            None => Err(FfsError::HandleExhausted),
        }
    }

    pub fn get(&self, handle: u64) -> Option<&OpenFile> {
        self.slots.get(handle as usize).and_then(|slot| slot.as_ref())
    }

    pub fn release(&mut self, handle: u64) {
        if let Some(slot) = self.slots.get_mut(handle as usize) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_reuses_slots() {
        let mut table = HandleTable::new(2);
        let a = table.allocate("/a".to_string(), 0).unwrap();
        let b = table.allocate("/b".to_string(), 0).unwrap();
        assert!(table.allocate("/c".to_string(), 0).is_err());
        table.release(a);
        let c = table.allocate("/c".to_string(), 0).unwrap();
        assert_eq!(c, a);
        assert_eq!(table.get(b).unwrap().path, "/b");
    }
}
