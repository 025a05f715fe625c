//! Bounded retry around idempotent RPC operations with a liveness probe between attempts.
//!
//! The first attempt runs immediately. Before every later attempt the endpoint is probed with a
//! bare TCP connect; an unreachable endpoint either yields the caller's fallback or fails with
//! [`ScanError::EndpointOffline`], depending on [`RetryPolicy::throw_if_offline`]. Results are
//! never cached.

use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

use crate::abi::{decode_log, parse_hex_u64, Address, EventRecord, TxHash};
use crate::block::{to_quantity, BlockRange, BlockTag};
use crate::config::RetryPolicy;
use crate::error::{ScanError, TransportError};
use crate::filter::EventFilter;
use crate::transport::Transport;

/// Run `op` up to `policy.max_attempts` times (at least once).
///
/// - `fallback` is returned when the endpoint is offline and `throw_if_offline` is false, and
///   when the error says the requested event does not exist on the contract.
/// - Fatal errors (malformed URL, unresolvable range) and undecodable responses are returned
///   without retrying.
/// - Exhausting every attempt fails with [`ScanError::RetryExhausted`].
pub async fn invoke<T, V, F, Fut>(
    transport: &T,
    policy: &RetryPolicy,
    operation: &str,
    fallback: V,
    mut op: F,
) -> Result<V, ScanError>
where
    T: Transport + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<V, ScanError>>,
{
    let url = transport.url();
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            if !transport.is_reachable(policy.probe_timeout()).await {
                if !policy.throw_if_offline {
                    tracing::warn!(%url, operation, attempt, "endpoint off-line, using fallback value");
                    return Ok(fallback);
                }
                tracing::error!(%url, operation, "cannot call because server is off-line");
                return Err(ScanError::EndpointOffline {
                    url: url.to_string(),
                    operation: operation.to_string(),
                });
            }
            tracing::trace!(%url, operation, attempt, "repeat call");
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_event_not_defined() => {
                tracing::debug!(%url, operation, reason = %e, "event not defined, nothing to retry");
                return Ok(fallback);
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!(%url, operation, reason = %e, "non-retryable failure");
                return Err(e);
            }
            Err(e) => {
                if attempt == 1 {
                    tracing::warn!(%url, operation, attempt, reason = %e, "call attempt failed");
                } else {
                    tracing::debug!(%url, operation, attempt, reason = %e, "call attempt failed");
                }
                last_error = e.to_string();
            }
        }
    }

    tracing::error!(
        critical = true,
        %url,
        operation,
        attempts,
        last_error = %last_error,
        "call failed after all attempts"
    );
    Err(ScanError::RetryExhausted {
        url: url.to_string(),
        operation: operation.to_string(),
        attempts,
        last_error,
    })
}

async fn request<T: Transport + ?Sized>(
    transport: &T,
    method: &str,
    params: Value,
) -> Result<Value, ScanError> {
    transport.request(method, params).await.map_err(ScanError::from)
}

fn quantity_result(method: &str, value: &Value) -> Result<u64, ScanError> {
    let s = value
        .as_str()
        .ok_or_else(|| TransportError::Protocol(format!("{method} result is not a string")))?;
    parse_hex_u64(s)
}

/// Current chain height. An unreachable endpoint always fails this call; there is no meaningful
/// fallback height.
pub async fn block_number<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
) -> Result<u64, ScanError> {
    let policy = policy.clone().throw_if_offline(true);
    invoke(transport, &policy, "eth_blockNumber", 0, || fetch_block_number(transport)).await
}

async fn fetch_block_number<T: Transport + ?Sized>(transport: &T) -> Result<u64, ScanError> {
    let result = request(transport, "eth_blockNumber", json!([])).await?;
    quantity_result("eth_blockNumber", &result)
}

/// Receipt of `tx_hash`, `None` while the transaction is unknown or pending.
pub async fn transaction_receipt<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    tx_hash: &TxHash,
) -> Result<Option<Value>, ScanError> {
    let params = json!([format!("0x{}", hex::encode(tx_hash))]);
    invoke(transport, policy, "eth_getTransactionReceipt", None, || {
        fetch_receipt(transport, params.clone())
    })
    .await
}

async fn fetch_receipt<T: Transport + ?Sized>(
    transport: &T,
    params: Value,
) -> Result<Option<Value>, ScanError> {
    let result = request(transport, "eth_getTransactionReceipt", params).await?;
    Ok((!result.is_null()).then_some(result))
}

/// Nonce of `address` at `block`; `fallback` when the endpoint is offline and the policy allows it.
pub async fn transaction_count<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    address: &Address,
    block: BlockTag,
    fallback: u64,
) -> Result<u64, ScanError> {
    let tag = match block {
        BlockTag::Latest => "latest".to_string(),
        BlockTag::Number(n) => to_quantity(n),
    };
    let params = json!([format!("0x{}", hex::encode(address)), tag]);
    invoke(transport, policy, "eth_getTransactionCount", fallback, || {
        fetch_transaction_count(transport, params.clone())
    })
    .await
}

async fn fetch_transaction_count<T: Transport + ?Sized>(
    transport: &T,
    params: Value,
) -> Result<u64, ScanError> {
    let result = request(transport, "eth_getTransactionCount", params).await?;
    quantity_result("eth_getTransactionCount", &result)
}

/// `eth_getLogs` over one resolved range. An empty range returns no events without a request.
pub async fn logs<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    filter: &EventFilter,
    range: BlockRange,
) -> Result<Vec<EventRecord>, ScanError> {
    if range.is_empty() {
        return Ok(Vec::new());
    }
    let params = json!([filter.to_json(range.from, range.to)]);
    invoke(transport, policy, "eth_getLogs", Vec::new(), || {
        fetch_logs(transport, params.clone())
    })
    .await
}

async fn fetch_logs<T: Transport + ?Sized>(
    transport: &T,
    params: Value,
) -> Result<Vec<EventRecord>, ScanError> {
    let result = request(transport, "eth_getLogs", params).await?;
    let entries = result
        .as_array()
        .ok_or_else(|| TransportError::Protocol("eth_getLogs result is not an array".into()))?;
    entries.iter().map(decode_log).collect()
}

/// Poll the height every `poll` until it grows past the height seen on entry; returns the new
/// height. Wrap in a timeout to bound the wait.
pub async fn wait_for_next_block<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    poll: Duration,
) -> Result<u64, ScanError> {
    let start = block_number(transport, policy).await?;
    tracing::debug!(url = %transport.url(), start, "waiting for next block");
    loop {
        tokio::time::sleep(poll).await;
        let now = block_number(transport, policy).await?;
        if now > start {
            tracing::debug!(url = %transport.url(), start, now, "next block appeared");
            return Ok(now);
        }
    }
}
