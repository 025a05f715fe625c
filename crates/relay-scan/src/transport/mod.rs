//! JSON-RPC transports: persistent WebSocket, one-shot HTTP(S), and an external helper process.
//!
//! [`Transport`] is the seam the resilient call layer invokes through. [`RpcCall`] picks the
//! socket or HTTP implementation from the URL scheme.

pub mod http;
pub mod process;
pub mod socket;

pub use http::HttpTransport;
pub use process::ProcessTransport;
pub use socket::SocketTransport;

use rand::Rng;
use reqwest::Url;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::TransportOptions;
use crate::error::TransportError;

/// Largest id JavaScript JSON-RPC peers handle without precision loss (2^53 - 1).
const MAX_RPC_ID: u64 = (1 << 53) - 1;

/// A handle that can send one JSON-RPC request to an endpoint.
pub trait Transport: Send + Sync {
    /// Endpoint URL, used for liveness probing and logging.
    fn url(&self) -> &str;

    /// Send `method(params)` and return the `result` member of the response.
    fn request(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// Bare TCP reachability check of the endpoint.
    fn is_reachable(&self, wait: Duration) -> impl Future<Output = bool> + Send {
        check_url(self.url(), wait)
    }
}

impl<T: Transport> Transport for &T {
    fn url(&self) -> &str {
        (**self).url()
    }

    fn request(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send {
        (**self).request(method, params)
    }

    fn is_reachable(&self, wait: Duration) -> impl Future<Output = bool> + Send {
        (**self).is_reachable(wait)
    }
}

/// Transport chosen from the URL scheme: `ws`/`wss` keep a socket open, `http`/`https` post once
/// per request.
#[derive(Debug)]
pub enum RpcCall {
    Socket(SocketTransport),
    Http(HttpTransport),
}

impl RpcCall {
    /// Create a handle for `url`. Socket handles connect before returning.
    pub async fn create(url: &str, options: TransportOptions) -> Result<Self, TransportError> {
        let parsed = parse_url(url)?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(RpcCall::Socket(SocketTransport::connect(url, options).await?)),
            "http" | "https" => Ok(RpcCall::Http(HttpTransport::new(url, &options)?)),
            other => Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {other:?} in {url}"
            ))),
        }
    }

    /// Close the socket (if any) and cancel its pending requests.
    pub async fn disconnect(&self) {
        if let RpcCall::Socket(socket) = self {
            socket.disconnect().await;
        }
    }
}

impl Transport for RpcCall {
    fn url(&self) -> &str {
        match self {
            RpcCall::Socket(s) => s.url(),
            RpcCall::Http(h) => h.url(),
        }
    }

    fn request(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send {
        async move {
            match self {
                RpcCall::Socket(s) => s.request(method, params).await,
                RpcCall::Http(h) => h.request(method, params).await,
            }
        }
    }
}

pub(crate) fn parse_url(url: &str) -> Result<Url, TransportError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidUrl("empty URL".into()));
    }
    Url::parse(trimmed).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))
}

/// A random positive request id.
pub fn random_rpc_id() -> u64 {
    rand::thread_rng().gen_range(1..=MAX_RPC_ID)
}

/// JSON-RPC 2.0 request body.
pub fn envelope(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Fill in `jsonrpc` and a positive numeric `id` when a caller-built request lacks them.
pub fn enrich_envelope(mut request: Value) -> Value {
    if let Some(obj) = request.as_object_mut() {
        let has_version = obj
            .get("jsonrpc")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.is_empty());
        if !has_version {
            obj.insert("jsonrpc".into(), Value::String("2.0".into()));
        }
        let has_id = obj.get("id").and_then(|v| v.as_u64()).is_some_and(|id| id > 0);
        if !has_id {
            obj.insert("id".into(), Value::from(random_rpc_id()));
        }
    }
    request
}

/// Extract `result` from a JSON-RPC response, mapping an `error` member to [`TransportError::Rpc`].
pub fn parse_response(response: Value) -> Result<Value, TransportError> {
    if let Some(err) = response.get("error") {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(TransportError::Rpc { code, message });
    }
    match response {
        Value::Object(mut obj) => obj
            .remove("result")
            .ok_or_else(|| TransportError::Protocol("missing result".into())),
        _ => Err(TransportError::Protocol("response is not an object".into())),
    }
}

pub fn default_port(scheme: &str) -> u16 {
    match scheme.to_ascii_lowercase().as_str() {
        "https" | "wss" => 443,
        _ => 80,
    }
}

/// Host and port of `url`, defaulting the port from the scheme.
pub fn host_and_port(url: &str) -> Option<(String, u16)> {
    let parsed = parse_url(url).ok()?;
    let host = parsed.host_str()?.trim_matches(|c| c == '[' || c == ']').to_string();
    let port = parsed.port().unwrap_or_else(|| default_port(parsed.scheme()));
    Some((host, port))
}

/// Liveness probe: open and immediately drop a TCP connection to the URL's host and port.
pub async fn check_url(url: &str, wait: Duration) -> bool {
    let Some((host, port)) = host_and_port(url) else {
        tracing::debug!(url, "TCP connection check: cannot extract host and port");
        return false;
    };
    tracing::trace!(%host, port, "TCP connection check started");
    match timeout(wait, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            tracing::trace!(%host, port, "TCP connection check passed");
            true
        }
        Ok(Err(e)) => {
            tracing::debug!(%host, port, reason = %e, "TCP connection check failed");
            false
        }
        Err(_) => {
            tracing::debug!(%host, port, "TCP connection check timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        assert_eq!(host_and_port("http://node.example"), Some(("node.example".into(), 80)));
        assert_eq!(host_and_port("ws://node.example"), Some(("node.example".into(), 80)));
        assert_eq!(host_and_port("https://node.example"), Some(("node.example".into(), 443)));
        assert_eq!(host_and_port("wss://node.example/path"), Some(("node.example".into(), 443)));
        assert_eq!(host_and_port("http://127.0.0.1:8545"), Some(("127.0.0.1".into(), 8545)));
        assert_eq!(host_and_port("not a url"), None);
    }

    #[test]
    fn enrich_fills_missing_fields() {
        let req = enrich_envelope(json!({"method": "eth_blockNumber", "params": []}));
        assert_eq!(req["jsonrpc"], "2.0");
        let id = req["id"].as_u64().unwrap();
        assert!(id >= 1 && id <= MAX_RPC_ID);

        let kept = enrich_envelope(json!({"jsonrpc": "2.0", "id": 7, "method": "m"}));
        assert_eq!(kept["id"], 7);

        let replaced = enrich_envelope(json!({"jsonrpc": "", "id": 0}));
        assert_eq!(replaced["jsonrpc"], "2.0");
        assert_ne!(replaced["id"], 0);
    }

    #[test]
    fn parse_response_result_and_error() {
        assert_eq!(parse_response(json!({"id": 1, "result": "0x10"})).unwrap(), json!("0x10"));
        match parse_response(json!({"id": 1, "error": {"code": -32000, "message": "nope"}})) {
            Err(TransportError::Rpc { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "nope");
            }
            other => panic!("expected Rpc error, got {other:?}"),
        }
        assert!(matches!(
            parse_response(json!({"id": 1})),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn null_result_is_a_result() {
        assert_eq!(parse_response(json!({"id": 1, "result": null})).unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn create_rejects_bad_urls() {
        let err = RpcCall::create("", TransportOptions::default()).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
        let err = RpcCall::create("ftp://host", TransportOptions::default()).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn check_url_rejects_unparsable() {
        assert!(!check_url("::::", Duration::from_millis(50)).await);
    }
}
