//! A real [`Store`] backed by etcd's v3 transaction API, whose single
//! compare-then-branch multi-op maps directly onto this crate's `Txn`
//! contract. Bridged synchronously via a dedicated Tokio runtime, since
//! the filesystem adapter above it is single-threaded and blocking.

use std::sync::Arc;

use etcd_client::{
    Client, Compare as EtcdCompare, CompareOp, GetOptions, TxnOp, TxnOpResponse, TxnResponse as EtcdTxnResponse,
};
use parking_lot::Mutex;
use tokio::runtime::Runtime;

use crate::error::{FfsError, Result};
use crate::store::{Compare, Deadline, Entry, Op, Store, Txn, TxnResponse, Witness};

/// gRPC message size cap lifted on both directions: metadata records are
/// small, but file payloads are not bounded by this layer.
const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

pub struct EtcdStore {
    client: Mutex<Client>,
    runtime: Runtime,
}

impl EtcdStore {
    pub fn connect(endpoints: &[String]) -> Result<EtcdStore> {
        let runtime = Runtime::new().map_err(|e| FfsError::Store(e.to_string()))?;
        let options = etcd_client::ConnectOptions::new()
            .with_max_decoding_message_size(MAX_MESSAGE_SIZE)
            .with_max_encoding_message_size(MAX_MESSAGE_SIZE);
        let client = runtime
            .block_on(Client::connect(endpoints, Some(options)))
            .map_err(|e| FfsError::Store(e.to_string()))?;
        Ok(EtcdStore { client: Mutex::new(client), runtime })
    }

    fn call_with_deadline<T>(
        &self,
        deadline: Deadline,
        fut: impl std::future::Future<Output = std::result::Result<T, etcd_client::Error>>,
    ) -> Result<T> {
        if deadline.expired() {
            return Err(FfsError::Store("deadline exceeded".to_string()));
        }
        self.runtime.block_on(fut).map_err(|e| FfsError::Store(e.to_string()))
    }
}

fn witness_compare(key: &str, witness: Witness) -> EtcdCompare {
    match witness {
        Witness::Version(v) => EtcdCompare::version(key, CompareOp::Equal, v),
        Witness::NeverCreated => EtcdCompare::create_revision(key, CompareOp::Equal, 0),
    }
}

fn entry_from_kv(key: String, value: Option<Vec<u8>>, version: i64) -> Entry {
    if version == 0 {
        Entry { key, value: None, witness: Witness::NeverCreated }
    } else {
        Entry { key, value, witness: Witness::Version(version) }
    }
}

fn op_response_to_entry(resp: TxnOpResponse) -> Vec<Entry> {
    match resp {
        TxnOpResponse::Get(get) => get
            .kvs()
            .iter()
            .map(|kv| {
                entry_from_kv(
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    Some(kv.value().to_vec()),
                    kv.version(),
                )
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl Store for EtcdStore {
    fn get(&self, key: &str, deadline: Deadline) -> Result<Entry> {
        let key = key.to_string();
        let mut client = self.client.lock();
        let resp = self.call_with_deadline(deadline, client.get(key.clone(), None))?;
        match resp.kvs().first() {
            Some(kv) => Ok(entry_from_kv(key, Some(kv.value().to_vec()), kv.version())),
            None => Ok(Entry { key, value: None, witness: Witness::NeverCreated }),
        }
    }

    fn get_prefix(
        &self,
        prefix: &str,
        keys_only: bool,
        limit: usize,
        deadline: Deadline,
    ) -> Result<Vec<Entry>> {
        let mut options = GetOptions::new().with_prefix();
        if keys_only {
            options = options.with_keys_only();
        }
        if limit != 0 {
            options = options.with_limit(limit as i64);
        }
        let mut client = self.client.lock();
        let resp = self.call_with_deadline(deadline, client.get(prefix, Some(options)))?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                entry_from_kv(
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    if keys_only { None } else { Some(kv.value().to_vec()) },
                    kv.version(),
                )
            })
            .collect())
    }

    fn txn(&self, txn: Txn, deadline: Deadline) -> Result<TxnResponse> {
        let compare: Vec<EtcdCompare> = txn
            .compare
            .iter()
            .map(|Compare { key, expect }| witness_compare(key, *expect))
            .collect();
        let success: Vec<TxnOp> = txn.success.iter().map(op_to_txn_op).collect();
        let failure: Vec<TxnOp> = txn.failure.iter().map(op_to_txn_op).collect();

        let etcd_txn = etcd_client::Txn::new().when(compare).and_then(success).or_else(failure);

        let mut client = self.client.lock();
        let resp: EtcdTxnResponse = self.call_with_deadline(deadline, client.txn(etcd_txn))?;
        let succeeded = resp.succeeded();
        let reads = resp.op_responses().into_iter().flat_map(op_response_to_entry).collect();
        Ok(TxnResponse { succeeded, reads })
    }
}

fn op_to_txn_op(op: &Op) -> TxnOp {
    match op {
        Op::Put { key, value } => TxnOp::put(key.clone(), value.clone(), None),
        Op::Delete { key } => TxnOp::delete(key.clone(), None),
        Op::Get { key } => TxnOp::get(key.clone(), None),
    }
}

/// Convenience constructor for a single-endpoint deployment, matching the
/// shape of a `--endpoint` CLI flag.
pub fn connect_single(endpoint: &str) -> Result<Arc<EtcdStore>> {
    Ok(Arc::new(EtcdStore::connect(&[endpoint.to_string()])?))
}
