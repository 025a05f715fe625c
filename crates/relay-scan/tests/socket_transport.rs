//! WebSocket transport against an in-process JSON-RPC server.

mod common;

use common::{init_tracing, rpc_result, spawn_ws_server, Reply};
use relay_scan::{SocketTransport, TransportError, TransportOptions};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;

/// Echo `params[0]` back after `params[1]` milliseconds.
fn delayed_echo(request: &Value) -> Vec<Reply> {
    let wait = Duration::from_millis(request["params"][1].as_u64().unwrap_or(0));
    vec![Reply::Delayed(wait, rpc_result(request, request["params"][0].clone()))]
}

#[tokio::test]
async fn concurrent_requests_resolve_by_id() -> anyhow::Result<()> {
    init_tracing();
    let server = spawn_ws_server(delayed_echo).await?;
    let socket = SocketTransport::connect(&server.url, TransportOptions::default()).await?;

    // Later requests are answered first.
    let (a, b, c) = tokio::join!(
        socket.call("echo", json!(["first", 150])),
        socket.call("echo", json!(["second", 75])),
        socket.call("echo", json!(["third", 0])),
    );
    assert_eq!(a?, json!("first"));
    assert_eq!(b?, json!("second"));
    assert_eq!(c?, json!("third"));
    assert_eq!(socket.pending_requests().await, 0);
    assert_eq!(server.connections(), 1);

    socket.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn response_with_unknown_id_is_ignored() -> anyhow::Result<()> {
    init_tracing();
    let server = spawn_ws_server(|request: &Value| {
        vec![
            Reply::Send(json!({"jsonrpc": "2.0", "id": 1u64 << 60, "result": "stray"})),
            Reply::Send(json!({"jsonrpc": "2.0", "method": "eth_subscription", "params": {}})),
            Reply::Send(rpc_result(request, json!("0x10"))),
        ]
    })
    .await?;
    let socket = SocketTransport::connect(&server.url, TransportOptions::default()).await?;

    assert_eq!(socket.call("eth_blockNumber", json!([])).await?, json!("0x10"));
    assert!(socket.is_connected().await);
    socket.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn rpc_error_is_returned_to_the_caller() -> anyhow::Result<()> {
    init_tracing();
    let server = spawn_ws_server(|request: &Value| {
        vec![Reply::Send(common::rpc_error(request, -32000, "execution reverted"))]
    })
    .await?;
    let socket = SocketTransport::connect(&server.url, TransportOptions::default()).await?;

    let err = socket.call("eth_call", json!([])).await.unwrap_err();
    assert!(
        matches!(&err, TransportError::Rpc { code: -32000, message } if message == "execution reverted"),
        "{err}"
    );
    socket.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn unanswered_request_times_out() -> anyhow::Result<()> {
    init_tracing();
    let server = spawn_ws_server(|_: &Value| Vec::new()).await?;
    let options = TransportOptions {
        request_timeout_secs: 1,
        ..Default::default()
    };
    let socket = SocketTransport::connect(&server.url, options).await?;

    let err = socket.call("eth_blockNumber", json!([])).await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout), "{err}");
    assert_eq!(socket.pending_requests().await, 0);
    assert!(socket.is_connected().await);
    socket.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn server_close_fails_pending_requests() -> anyhow::Result<()> {
    init_tracing();
    let server = spawn_ws_server(|request: &Value| match request["method"].as_str() {
        Some("close") => vec![Reply::Close],
        _ => Vec::new(),
    })
    .await?;
    let socket = SocketTransport::connect(&server.url, TransportOptions::default()).await?;

    let (waiting, _) = tokio::join!(
        socket.call("eth_blockNumber", json!([])),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.call("close", json!([])).await
        }
    );
    let err = waiting.unwrap_err();
    assert!(matches!(err, TransportError::Disconnected), "{err}");
    assert_eq!(socket.pending_requests().await, 0);

    // Without auto-reconnect the handle stays closed.
    assert!(!socket.is_connected().await);
    let err = socket.call("eth_blockNumber", json!([])).await.unwrap_err();
    assert!(matches!(err, TransportError::NotConnected), "{err}");
    Ok(())
}

#[tokio::test]
async fn auto_reconnect_reopens_before_next_request() -> anyhow::Result<()> {
    init_tracing();
    let server = spawn_ws_server(|request: &Value| match request["method"].as_str() {
        Some("close") => vec![Reply::Close],
        _ => vec![Reply::Send(rpc_result(request, json!("0x2a")))],
    })
    .await?;
    let options = TransportOptions {
        auto_reconnect: true,
        ..Default::default()
    };
    let socket = SocketTransport::connect(&server.url, options).await?;

    let err = socket.call("close", json!([])).await.unwrap_err();
    assert!(matches!(err, TransportError::Disconnected), "{err}");
    timeout(Duration::from_secs(5), async {
        while socket.is_connected().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    assert_eq!(socket.call("eth_blockNumber", json!([])).await?, json!("0x2a"));
    assert!(server.connections() >= 2);
    socket.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn disconnect_rejects_further_requests() -> anyhow::Result<()> {
    init_tracing();
    let server = spawn_ws_server(|request: &Value| {
        vec![Reply::Send(rpc_result(request, json!(true)))]
    })
    .await?;
    let options = TransportOptions {
        auto_reconnect: true,
        ..Default::default()
    };
    let socket = SocketTransport::connect(&server.url, options).await?;
    assert_eq!(socket.call("ping", json!([])).await?, json!(true));

    socket.disconnect().await;
    assert!(!socket.is_connected().await);
    let err = socket.call("ping", json!([])).await.unwrap_err();
    assert!(matches!(err, TransportError::NotConnected), "{err}");
    assert_eq!(server.connections(), 1);
    Ok(())
}
