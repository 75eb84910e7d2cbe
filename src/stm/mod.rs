//! The optimistic transaction engine.
//!
//! One [`Stm`] represents a single optimistic transaction attempt against a
//! [`Store`]: a read-set, a write-set, and a conflict set of version
//! witnesses to re-verify at commit time. [`run_with_retry`] is a
//! higher-order function that runs a closure against a fresh `Stm` once
//! per attempt, retrying on conflict.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::{FfsError, Result};
use crate::store::{Compare, Deadline, Op, Store, Txn, Witness};

/// Default bound on [`run_with_retry`] attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// One optimistic transaction attempt.
///
/// `r` is the read-set **R**: every key this attempt has observed, buffered
/// so repeated reads and reads-after-write see a consistent view. `w` is
/// the write-set **W**, `None` standing in for a pending delete. `k` is the
/// conflict set **K**: for every key `get` actually asked the store about,
/// the witness to re-verify at commit.
pub struct Stm<'s, S: Store> {
    store: &'s S,
    deadline: Deadline,
    r: HashMap<String, Option<Vec<u8>>>,
    w: HashMap<String, Option<Vec<u8>>>,
    k: HashMap<String, Witness>,
    committed: bool,
}

impl<'s, S: Store> Stm<'s, S> {
    pub fn new(store: &'s S, deadline: Deadline) -> Stm<'s, S> {
        Stm {
            store,
            deadline,
            r: HashMap::new(),
            w: HashMap::new(),
            k: HashMap::new(),
            committed: false,
        }
    }

    /// Buffered read. Populates R (and, for keys not already buffered by a
    /// prior `put`/`delete`, K) on first access.
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.r.get(key) {
            return Ok(value.clone());
        }
        let entry = self.store.get(key, self.deadline)?;
        self.k.insert(key.to_string(), entry.witness);
        self.r.insert(key.to_string(), entry.value.clone());
        Ok(entry.value)
    }

    /// Buffers a write. Does not touch K: a key this transaction only ever
    /// writes (never reads) is never guarded by a version compare, by
    /// design — it has nothing to conflict with from this attempt's view.
    pub fn put(&mut self, key: &str, value: Vec<u8>) {
        self.w.insert(key.to_string(), Some(value.clone()));
        self.r.insert(key.to_string(), Some(value));
    }

    pub fn delete(&mut self, key: &str) {
        self.w.insert(key.to_string(), None);
        self.r.insert(key.to_string(), None);
    }

    /// Single multi-op read for every key in `keys` not already in R.
    pub fn prefetch(&mut self, keys: &[String]) -> Result<()> {
        let to_fetch: Vec<String> = keys
            .iter()
            .filter(|k| !self.r.contains_key(k.as_str()))
            .cloned()
            .collect();
        if to_fetch.is_empty() {
            return Ok(());
        }
        let txn = Txn {
            compare: vec![],
            success: to_fetch.iter().map(|k| Op::Get { key: k.clone() }).collect(),
            failure: vec![],
        };
        let resp = self.store.txn(txn, self.deadline)?;
        debug_assert!(resp.succeeded, "a compare-less txn must always succeed");
        for entry in resp.reads {
            self.k.insert(entry.key.clone(), entry.witness);
            self.r.insert(entry.key, entry.value);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.r.clear();
        self.w.clear();
        self.k.clear();
    }

    /// Commits the buffered writes with a single compare-and-swap multi-op.
    ///
    /// On conflict, clears W and K and repopulates R/K from the refreshed
    /// reads the store ran instead, then returns [`FfsError::Conflict`] —
    /// the caller (normally [`run_with_retry`]) is responsible for retrying.
    pub fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(FfsError::AlreadyInTransaction);
        }

        let compare: Vec<Compare> = self
            .k
            .iter()
            .map(|(key, witness)| Compare {
                key: key.clone(),
                expect: *witness,
            })
            .collect();
        let success: Vec<Op> = self
            .w
            .iter()
            .map(|(key, value)| match value {
                Some(v) => Op::Put {
                    key: key.clone(),
                    value: v.clone(),
                },
                None => Op::Delete { key: key.clone() },
            })
            .collect();
        let failure: Vec<Op> = self.r.keys().map(|k| Op::Get { key: k.clone() }).collect();

        let resp = self.store.txn(Txn { compare, success, failure }, self.deadline)?;

        if resp.succeeded {
            self.committed = true;
            self.reset();
            return Ok(());
        }

        self.w.clear();
        self.k.clear();
        for entry in resp.reads {
            self.k.insert(entry.key.clone(), entry.witness);
            self.r.insert(entry.key, entry.value);
        }
        Err(FfsError::Conflict)
    }
}

/// Runs `body` against a fresh [`Stm`] per attempt, committing on normal
/// return and resetting (by dropping the `Stm`) on any error. Retries on
/// [`FfsError::Conflict`] up to `max_retries` times with `backoff` between
/// attempts; any other error propagates immediately without retry.
pub fn run_with_retry<S, T>(
    store: &S,
    deadline: Deadline,
    max_retries: u32,
    backoff: Duration,
    prefetch_keys: &[String],
    mut body: impl FnMut(&mut Stm<S>) -> Result<T>,
) -> Result<T>
where
    S: Store,
{
    for attempt in 0..max_retries {
        let mut stm = Stm::new(store, deadline);
        stm.prefetch(prefetch_keys)?;
        match body(&mut stm) {
            Ok(value) => match stm.commit() {
                Ok(()) => return Ok(value),
                Err(FfsError::Conflict) => {
                    debug!("stm conflict, retrying (attempt {attempt})");
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
    Err(FfsError::Conflict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;

    #[test]
    fn commits_on_first_attempt_without_contention() {
        let store = MemStore::new();
        let result = run_with_retry(&store, Deadline::None, DEFAULT_MAX_RETRIES, Duration::ZERO, &[], |tx| {
            tx.put("meta/a", b"1".to_vec());
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(store.get("meta/a", Deadline::None).unwrap().value, Some(b"1".to_vec()));
    }

    #[test]
    fn retries_on_conflict_then_succeeds() {
        let store = MemStore::new();
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

        let mut first_attempt = true;
        let result = run_with_retry(&store, Deadline::None, DEFAULT_MAX_RETRIES, Duration::ZERO, &[], |tx| {
            let value = tx.get("meta/counter")?.unwrap();
            if first_attempt {
                first_attempt = false;
                // Simulate a racing writer landing between our read and our commit.
                store
                    .txn(
                        Txn {
                            compare: vec![],
                            success: vec![Op::Put { key: "meta/counter".to_string(), value: b"99".to_vec() }],
                            failure: vec![],
                        },
                        Deadline::None,
                    )
                    .unwrap();
            }
            let n: i64 = String::from_utf8(value).unwrap().parse().unwrap();
            tx.put("meta/counter", (n + 1).to_string().into_bytes());
            Ok(())
        });
        assert!(result.is_ok());
        let final_value = store.get("meta/counter", Deadline::None).unwrap().value.unwrap();
        assert_eq!(String::from_utf8(final_value).unwrap(), "100");
    }

    #[test]
    fn non_conflict_error_propagates_without_retry() {
        let store = MemStore::new();
        let mut attempts = 0;
        let result: Result<()> = run_with_retry(&store, Deadline::None, DEFAULT_MAX_RETRIES, Duration::ZERO, &[], |_tx| {
            attempts += 1;
            Err(FfsError::NotFound("/missing".to_string()))
        });
        assert!(matches!(result, Err(FfsError::NotFound(_))));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn phantom_create_is_guarded() {
        let store = MemStore::new();
        // First transaction observes the key as absent...
        let mut stm = Stm::new(&store, Deadline::None);
        assert_eq!(stm.get("meta/x").unwrap(), None);
        // ...then someone else creates it before we commit.
        store
            .txn(
                Txn {
                    compare: vec![Compare { key: "meta/x".to_string(), expect: Witness::NeverCreated }],
                    success: vec![Op::Put { key: "meta/x".to_string(), value: b"racer".to_vec() }],
                    failure: vec![],
                },
                Deadline::None,
            )
            .unwrap();
        stm.put("meta/x", b"ours".to_vec());
        assert!(matches!(stm.commit(), Err(FfsError::Conflict)));
    }

    #[test]
    fn atomicity_no_keys_altered_on_body_error() {
        let store = MemStore::new();
        let result: Result<()> = run_with_retry(&store, Deadline::None, DEFAULT_MAX_RETRIES, Duration::ZERO, &[], |tx| {
            tx.put("meta/a", b"1".to_vec());
            Err(FfsError::NotADirectory("/a".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.get("meta/a", Deadline::None).unwrap().value, None);
    }
}
