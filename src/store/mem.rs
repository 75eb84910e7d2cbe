//! An in-memory reference [`Store`]: single mutex, `BTreeMap`-backed, used
//! by the adapter's test suite and by `ffs` itself when run without the
//! `etcd` feature. Prefix scans rely on `BTreeMap`'s sorted iteration
//! order, which is exactly what directory listing needs from the
//! `meta_key` layout.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{FfsError, Result};
use crate::store::{Compare, Deadline, Entry, Op, Store, Txn, TxnResponse, Witness};

struct Record {
    value: Vec<u8>,
    version: i64,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, Record>,
}

impl Inner {
    fn entry_for(&self, key: &str) -> Entry {
        match self.records.get(key) {
            Some(record) => Entry {
                key: key.to_string(),
                value: Some(record.value.clone()),
                witness: Witness::Version(record.version),
            },
            None => Entry {
                key: key.to_string(),
                value: None,
                witness: Witness::NeverCreated,
            },
        }
    }

    fn compare_holds(&self, cmp: &Compare) -> bool {
        match (&cmp.expect, self.records.get(&cmp.key)) {
            (Witness::Version(expected), Some(record)) => record.version == *expected,
            (Witness::Version(_), None) => false,
            (Witness::NeverCreated, None) => true,
            (Witness::NeverCreated, Some(_)) => false,
        }
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::Put { key, value } => {
                let version = self
                    .records
                    .get(key)
                    .map(|r| r.version + 1)
                    .unwrap_or(1);
                self.records.insert(
                    key.clone(),
                    Record {
                        value: value.clone(),
                        version,
                    },
                );
            }
            Op::Delete { key } => {
                self.records.remove(key);
            }
            Op::Get { .. } => {}
        }
    }

    fn read(&self, op: &Op) -> Option<Entry> {
        match op {
            Op::Get { key } => Some(self.entry_for(key)),
            _ => None,
        }
    }
}

/// Reference [`Store`] implementation backed by an in-process `BTreeMap`.
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn check_deadline(deadline: Deadline) -> Result<()> {
        if deadline.expired() {
            return Err(FfsError::Store("deadline exceeded".to_string()));
        }
        Ok(())
    }
}

impl Default for MemStore {
    fn default() -> Self {
        MemStore::new()
    }
}

impl Store for MemStore {
    fn get(&self, key: &str, deadline: Deadline) -> Result<Entry> {
        Self::check_deadline(deadline)?;
        let inner = self.inner.lock();
        Ok(inner.entry_for(key))
    }

    fn get_prefix(
        &self,
        prefix: &str,
        keys_only: bool,
        limit: usize,
        deadline: Deadline,
    ) -> Result<Vec<Entry>> {
        Self::check_deadline(deadline)?;
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for (key, record) in inner.records.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            out.push(Entry {
                key: key.clone(),
                value: if keys_only { None } else { Some(record.value.clone()) },
                witness: Witness::Version(record.version),
            });
            if limit != 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn txn(&self, txn: Txn, deadline: Deadline) -> Result<TxnResponse> {
        Self::check_deadline(deadline)?;
        let mut inner = self.inner.lock();

        let all_hold = txn.compare.iter().all(|cmp| inner.compare_holds(cmp));
        let branch = if all_hold { &txn.success } else { &txn.failure };

        let mut reads = Vec::new();
        if all_hold {
            for op in branch {
                inner.apply(op);
            }
        } else {
            for op in branch {
                if let Some(entry) = inner.read(op) {
                    reads.push(entry);
                }
            }
        }

        Ok(TxnResponse {
            succeeded: all_hold,
            reads,
        })
    }
}

/// Convenience for tests that want a finite `run_with_retry` deadline.
pub fn short_deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}
