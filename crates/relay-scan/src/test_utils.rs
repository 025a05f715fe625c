//! Scripted in-memory transport for exercising the retry layer and scanners without a node.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::abi::{parse_hex_u64, TxHash};
use crate::error::TransportError;
use crate::transport::Transport;

/// A JSON-RPC log entry in block `block` emitted by transaction `tx_hash`.
pub fn log_json(block: u64, tx_hash: TxHash) -> Value {
    json!({
        "address": format!("0x{}", "11".repeat(20)),
        "topics": [format!("0x{}", "22".repeat(32))],
        "data": "0x",
        "blockNumber": format!("0x{block:x}"),
        "transactionHash": format!("0x{}", hex::encode(tx_hash)),
        "logIndex": "0x0"
    })
}

/// Fake node: a chain height, a pool of logs served by block range, and scripted failures.
///
/// Every request and every liveness probe is counted so tests can assert exact attempt numbers.
#[derive(Debug)]
pub struct MockTransport {
    url: String,
    height: AtomicU64,
    grow_by: u64,
    logs: Vec<Value>,
    logs_error: Option<String>,
    failing_from_blocks: Vec<u64>,
    fail_first: AtomicUsize,
    reachable: bool,
    calls: Mutex<HashMap<String, usize>>,
    log_ranges: Mutex<Vec<(u64, u64)>>,
    probes: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new(height: u64) -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            height: AtomicU64::new(height),
            grow_by: 0,
            logs: Vec::new(),
            logs_error: None,
            failing_from_blocks: Vec::new(),
            fail_first: AtomicUsize::new(0),
            reachable: true,
            calls: Mutex::new(HashMap::new()),
            log_ranges: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    /// Logs served by `eth_getLogs` when their block falls inside the requested range.
    #[must_use]
    pub fn with_logs(mut self, logs: Vec<Value>) -> Self {
        self.logs = logs;
        self
    }

    /// Every `eth_getLogs` fails with an RPC error carrying `message`.
    #[must_use]
    pub fn fail_logs_with(mut self, message: &str) -> Self {
        self.logs_error = Some(message.to_string());
        self
    }

    /// `eth_getLogs` fails for windows starting at `from`.
    #[must_use]
    pub fn fail_logs_from_block(mut self, from: u64) -> Self {
        self.failing_from_blocks.push(from);
        self
    }

    /// The first `n` requests of any method fail with a connection error.
    #[must_use]
    pub fn fail_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Liveness probes report the endpoint unreachable.
    #[must_use]
    pub fn offline(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Height grows by `blocks` after every `eth_blockNumber`.
    #[must_use]
    pub fn grow_every_call(mut self, blocks: u64) -> Self {
        self.grow_by = blocks;
        self
    }

    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// `(from, to)` of every `eth_getLogs` request, in order.
    pub fn log_ranges(&self) -> Vec<(u64, u64)> {
        lock(&self.log_ranges).clone()
    }

    fn respond(&self, method: &str, params: &Value) -> Result<Value, TransportError> {
        *lock(&self.calls).entry(method.to_string()).or_insert(0) += 1;
        let scripted = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if scripted.is_ok() {
            return Err(TransportError::Connect("scripted failure".into()));
        }
        match method {
            "eth_blockNumber" => {
                let h = self.height.fetch_add(self.grow_by, Ordering::SeqCst);
                Ok(Value::String(format!("0x{h:x}")))
            }
            "eth_getLogs" => self.get_logs(params),
            "eth_getTransactionReceipt" => Ok(Value::Null),
            "eth_getTransactionCount" => Ok(Value::String("0x5".into())),
            other => Err(TransportError::Rpc {
                code: -32601,
                message: format!("method {other} not found"),
            }),
        }
    }

    fn get_logs(&self, params: &Value) -> Result<Value, TransportError> {
        let bound = |name: &str| {
            params[0][name]
                .as_str()
                .and_then(|s| parse_hex_u64(s).ok())
                .ok_or_else(|| TransportError::Protocol(format!("bad {name}")))
        };
        let (from, to) = (bound("fromBlock")?, bound("toBlock")?);
        lock(&self.log_ranges).push((from, to));
        if let Some(message) = &self.logs_error {
            return Err(TransportError::Rpc { code: -32000, message: message.clone() });
        }
        if self.failing_from_blocks.contains(&from) {
            return Err(TransportError::Rpc {
                code: -32005,
                message: "query returned more than 10000 results".into(),
            });
        }
        let hits = self
            .logs
            .iter()
            .filter(|log| {
                log["blockNumber"]
                    .as_str()
                    .and_then(|s| parse_hex_u64(s).ok())
                    .is_some_and(|b| b >= from && b <= to)
            })
            .cloned()
            .collect();
        Ok(Value::Array(hits))
    }
}

impl Transport for MockTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn request(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send {
        let result = self.respond(method, &params);
        async move { result }
    }

    fn is_reachable(&self, _wait: Duration) -> impl Future<Output = bool> + Send {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let reachable = self.reachable;
        async move { reachable }
    }
}
