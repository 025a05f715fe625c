//! Shared helpers for integration tests: an in-process JSON-RPC node reachable over WebSocket or
//! HTTP, plus tracing setup.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("relay_scan=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn rpc_result(request: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
}

pub fn rpc_error(request: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": code, "message": message}})
}

/// What the WebSocket server does in answer to one request.
pub enum Reply {
    Send(Value),
    Delayed(Duration, Value),
    /// Send a close frame and stop answering on this connection.
    Close,
}

pub struct WsServer {
    pub url: String,
    pub connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl WsServer {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for WsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// JSON-RPC over WebSocket; `handler` decides the replies for every request.
pub async fn spawn_ws_server<F>(handler: F) -> anyhow::Result<WsServer>
where
    F: Fn(&Value) -> Vec<Reply> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    let handler = Arc::new(handler);
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_ws(stream, handler.clone()));
        }
    });
    Ok(WsServer {
        url,
        connections,
        task,
    })
}

async fn serve_ws<F>(stream: TcpStream, handler: Arc<F>)
where
    F: Fn(&Value) -> Vec<Reply> + Send + Sync + 'static,
{
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let close = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || close {
                break;
            }
        }
    });
    while let Some(Ok(msg)) = source.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        for reply in handler(&request) {
            match reply {
                Reply::Send(v) => {
                    let _ = tx.send(Message::Text(v.to_string()));
                }
                Reply::Delayed(wait, v) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        let _ = tx.send(Message::Text(v.to_string()));
                    });
                }
                Reply::Close => {
                    let _ = tx.send(Message::Close(None));
                }
            }
        }
    }
    drop(tx);
    let _ = writer.await;
}

pub struct HttpServer {
    pub url: String,
    /// Raw request heads and bodies in arrival order.
    pub requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl HttpServer {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Minimal HTTP/1.1 responder: one request per connection, `handler` returns status and body.
pub async fn spawn_http_server<F>(handler: F) -> anyhow::Result<HttpServer>
where
    F: Fn(&Value) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    let handler = Arc::new(handler);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_http(stream, handler.clone(), seen.clone()));
        }
    });
    Ok(HttpServer {
        url,
        requests,
        task,
    })
}

async fn serve_http<F>(mut stream: TcpStream, handler: Arc<F>, seen: Arc<Mutex<Vec<String>>>)
where
    F: Fn(&Value) -> (u16, String) + Send + Sync + 'static,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
    let length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let text = String::from_utf8_lossy(&buf).to_string();
    seen.lock().unwrap().push(text);
    let request: Value =
        serde_json::from_slice(&buf[head_end..head_end + length]).unwrap_or(Value::Null);
    let (status, body) = handler(&request);
    let reason = if status == 200 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Log entry of `contract` in `block`, emitted by a transaction whose hash is `tx_byte` repeated.
pub fn log_entry(contract: [u8; 20], topic0: [u8; 32], block: u64, tx_byte: u8) -> Value {
    json!({
        "address": format!("0x{}", hex::encode(contract)),
        "topics": [format!("0x{}", hex::encode(topic0))],
        "data": "0x",
        "blockNumber": format!("0x{block:x}"),
        "transactionHash": format!("0x{}", hex::encode([tx_byte; 32])),
        "logIndex": "0x0"
    })
}

fn quantity(v: &Value) -> Option<u64> {
    u64::from_str_radix(v.as_str()?.trim_start_matches("0x"), 16).ok()
}

/// A fixed chain of height `height` serving `eth_blockNumber` and `eth_getLogs`.
#[derive(Clone)]
pub struct SimulatedChain {
    pub height: u64,
    pub logs: Vec<Value>,
    pub get_logs_calls: Arc<AtomicUsize>,
}

impl SimulatedChain {
    pub fn new(height: u64, logs: Vec<Value>) -> Self {
        Self {
            height,
            logs,
            get_logs_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn get_logs_calls(&self) -> usize {
        self.get_logs_calls.load(Ordering::SeqCst)
    }

    pub fn respond(&self, request: &Value) -> Value {
        match request["method"].as_str() {
            Some("eth_blockNumber") => rpc_result(request, json!(format!("0x{:x}", self.height))),
            Some("eth_getLogs") => {
                self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
                let filter = &request["params"][0];
                let (Some(from), Some(to)) =
                    (quantity(&filter["fromBlock"]), quantity(&filter["toBlock"]))
                else {
                    return rpc_error(request, -32602, "invalid block range");
                };
                let address = filter["address"].as_str().map(str::to_lowercase);
                let topic0 = filter["topics"][0].as_str().map(str::to_lowercase);
                let matching: Vec<Value> = self
                    .logs
                    .iter()
                    .filter(|log| {
                        quantity(&log["blockNumber"]).is_some_and(|b| b >= from && b <= to)
                    })
                    .filter(|log| address.as_deref().map_or(true, |a| log["address"] == a))
                    .filter(|log| topic0.as_deref().map_or(true, |t| log["topics"][0] == t))
                    .cloned()
                    .collect();
                rpc_result(request, Value::Array(matching))
            }
            _ => rpc_error(request, -32601, "method not found"),
        }
    }
}
