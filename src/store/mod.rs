//! The interface the STM engine needs from a strongly-consistent,
//! CAS-capable key-value store. The store's own RPC client, connection
//! management and wire encoding live elsewhere — this module only
//! specifies the shape of the contract and ships one in-memory reference
//! implementation ([`mem::MemStore`]) plus, behind the `etcd` feature, a
//! real backend.

pub mod mem;
#[cfg(feature = "etcd")]
pub mod etcd;

use std::time::{Duration, Instant};

use crate::error::Result;

/// A per-call deadline, threaded through one whole transaction attempt:
/// constructed once by the caller and never reset on retry.
#[derive(Debug, Clone, Copy)]
pub enum Deadline {
    None,
    At(Instant),
}

impl Deadline {
    pub fn after(timeout: Duration) -> Deadline {
        Deadline::At(Instant::now() + timeout)
    }

    pub fn expired(&self) -> bool {
        match self {
            Deadline::None => false,
            Deadline::At(instant) => Instant::now() >= *instant,
        }
    }
}

/// The version witness a store attaches to an existing key: either its
/// current `version` counter (for the compare-on-modification path) or a
/// marker meaning "this key was observed absent", which guards against a
/// phantom concurrent creation by comparing at commit time as
/// `create_revision(key) == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Witness {
    Version(i64),
    NeverCreated,
}

/// Result of a point or prefix read.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub witness: Witness,
}

/// One compare predicate in a multi-op's compare branch.
#[derive(Debug, Clone)]
pub struct Compare {
    pub key: String,
    pub expect: Witness,
}

/// One operation in a multi-op's success/failure branch.
#[derive(Debug, Clone)]
pub enum Op {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
    Get { key: String },
}

/// An atomic multi-op: `compare` predicates gate whether `success` or
/// `failure` executes, both as a single atomic batch.
#[derive(Debug, Clone, Default)]
pub struct Txn {
    pub compare: Vec<Compare>,
    pub success: Vec<Op>,
    pub failure: Vec<Op>,
}

/// Outcome of executing a [`Txn`]: which branch ran, and the [`Entry`]
/// results of any `Get` ops in that branch (in order).
#[derive(Debug, Clone)]
pub struct TxnResponse {
    pub succeeded: bool,
    pub reads: Vec<Entry>,
}

/// The downstream contract the STM engine is built against.
pub trait Store: Send + Sync {
    fn get(&self, key: &str, deadline: Deadline) -> Result<Entry>;

    /// Prefix scan. `keys_only` omits values (used for directory listing).
    /// `limit` bounds the number of entries returned, 0 meaning unbounded.
    fn get_prefix(
        &self,
        prefix: &str,
        keys_only: bool,
        limit: usize,
        deadline: Deadline,
    ) -> Result<Vec<Entry>>;

    fn txn(&self, txn: Txn, deadline: Deadline) -> Result<TxnResponse>;
}
