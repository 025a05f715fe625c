//! Resilient event discovery for cross-chain relayers.
//!
//! - **Transports** ([transport]): JSON-RPC over a persistent WebSocket (pending requests keyed by
//!   id, per-request timeout, optional auto-reconnect), one-shot HTTP(S) with optional client
//!   certificates, or an external helper process.
//! - **Resilient calls** ([resilient]): bounded retry with a TCP liveness probe between attempts.
//! - **Scanners** ([scanner]): newest-first iterative range splitting, progressive recent-first
//!   planning for full-history scans, and transaction-correlated lookup around a known block.

pub mod abi;
pub mod account;
pub mod block;
pub mod config;
pub mod error;
pub mod filter;
pub mod resilient;
pub mod scanner;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use abi::{decode_log, keccak256, Address, ContractAbi, EventAbi, EventRecord, TxHash};
pub use account::{resolve_address, Account};
pub use block::{BlockRange, BlockTag};
pub use config::{ReconnectionConfig, RetryPolicy, ScanConfig, TransportOptions};
pub use error::{ScanError, TransportError};
pub use filter::EventFilter;
pub use scanner::{progressive_scan_plan, EventScanner, ScanOutcome, ScanPlanAtom};
pub use transport::{
    check_url, HttpTransport, ProcessTransport, RpcCall, SocketTransport, Transport,
};
