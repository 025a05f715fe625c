//! Persistent WebSocket transport.
//!
//! One I/O task per connection multiplexes outbound requests and inbound responses. Each request
//! gets its own future: the caller waits on a oneshot receiver registered in the pending map under
//! the request id, and a per-request timer removes the entry if no response arrives in time.
//! When the socket errors or closes, every pending request of that connection fails with
//! [`TransportError::Disconnected`] and, with auto-reconnect on, a background loop reopens it.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use super::{envelope, parse_response, parse_url, Transport};
use crate::config::TransportOptions;
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Pending {
    method: String,
    generation: u64,
    tx: oneshot::Sender<Result<Value, TransportError>>,
    timer: JoinHandle<()>,
}

struct Connection {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    io_task: JoinHandle<()>,
}

struct Inner {
    url: String,
    options: TransportOptions,
    pending: Mutex<HashMap<u64, Pending>>,
    connection: Mutex<Option<Connection>>,
    shutting_down: AtomicBool,
    reconnecting: AtomicBool,
    next_id: AtomicU64,
    generation: AtomicU64,
}

/// JSON-RPC over a long-lived WebSocket, safe to share across concurrent calls.
pub struct SocketTransport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("url", &self.inner.url)
            .field("auto_reconnect", &self.inner.options.auto_reconnect)
            .finish()
    }
}

impl SocketTransport {
    /// Open the socket, waiting at most `options.connect_timeout()` for it to reach the open state.
    pub async fn connect(url: &str, options: TransportOptions) -> Result<Self, TransportError> {
        let parsed = parse_url(url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!("not a web socket URL: {url}")));
        }
        let inner = Arc::new(Inner {
            url: url.trim().to_string(),
            options,
            pending: Mutex::new(HashMap::new()),
            connection: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            next_id: AtomicU64::new(rand::thread_rng().gen_range(1..=u64::from(u32::MAX))),
            generation: AtomicU64::new(0),
        });
        {
            let mut slot = inner.connection.lock().await;
            Inner::open(&inner, &mut slot).await?;
        }
        Ok(Self { inner })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.outbound.is_closed())
    }

    /// Number of requests waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Stop reconnecting, close the socket and fail every pending request.
    pub async fn disconnect(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let conn = self.inner.connection.lock().await.take();
        if let Some(conn) = conn {
            // Dropping the sender makes the I/O task send a close frame and exit.
            drop(conn.outbound);
            if timeout(Duration::from_secs(5), conn.io_task).await.is_err() {
                tracing::debug!(url = %self.inner.url, "web socket I/O task did not stop in time");
            }
        }
        let drained = self.inner.fail_pending(None).await;
        tracing::info!(url = %self.inner.url, drained, "web socket disconnected");
    }

    /// Send one request and wait for the response with the same id.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let (generation, outbound) = self.outbound().await?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&envelope(id, method, params))?;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            let timer = spawn_request_timer(
                Arc::downgrade(&self.inner),
                id,
                self.inner.options.request_timeout(),
            );
            pending.insert(
                id,
                Pending {
                    method: method.to_string(),
                    generation,
                    tx,
                    timer,
                },
            );
        }
        if outbound.send(Message::Text(text)).is_err() {
            if let Some(p) = self.inner.pending.lock().await.remove(&id) {
                p.timer.abort();
            }
            return Err(TransportError::Disconnected);
        }
        rx.await.unwrap_or(Err(TransportError::Disconnected))
    }

    /// Sender of the live connection, reopening it first when closed and auto-reconnect is on.
    async fn outbound(&self) -> Result<(u64, mpsc::UnboundedSender<Message>), TransportError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let mut slot = self.inner.connection.lock().await;
        if let Some(conn) = slot.as_ref().filter(|c| !c.outbound.is_closed()) {
            return Ok((conn.generation, conn.outbound.clone()));
        }
        if !self.inner.options.auto_reconnect {
            return Err(TransportError::NotConnected);
        }
        tracing::debug!(url = %self.inner.url, "web socket closed, reconnecting before send");
        Inner::open(&self.inner, &mut slot).await?;
        slot.as_ref()
            .map(|c| (c.generation, c.outbound.clone()))
            .ok_or(TransportError::NotConnected)
    }
}

impl Transport for SocketTransport {
    fn url(&self) -> &str {
        &self.inner.url
    }

    fn request(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send {
        self.call(method, params)
    }
}

impl Inner {
    /// Dial and install a new connection in `slot`, replacing any dead one.
    async fn open(this: &Arc<Self>, slot: &mut Option<Connection>) -> Result<(), TransportError> {
        let wait = this.options.connect_timeout();
        let ws = timeout(wait, dial(&this.url, &this.options))
            .await
            .map_err(|_| {
                TransportError::Connect(format!("{} not open after {}s", this.url, wait.as_secs()))
            })??;
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let io_task = tokio::spawn(drive(Arc::downgrade(this), generation, ws, outbound_rx));
        if let Some(old) = slot.replace(Connection {
            generation,
            outbound,
            io_task,
        }) {
            // The aborted task never reaches `connection_lost`, so its requests are failed here.
            old.io_task.abort();
            let failed = this.fail_pending(Some(old.generation)).await;
            if failed > 0 {
                tracing::debug!(url = %this.url, generation = old.generation, failed, "replaced connection");
            }
        }
        tracing::info!(url = %this.url, generation, "web socket connected");
        Ok(())
    }

    async fn dispatch(&self, text: &str) {
        let response: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(url = %self.url, reason = %e, "unparsable web socket message");
                return;
            }
        };
        let Some(id) = response.get("id").and_then(Value::as_u64) else {
            tracing::trace!(url = %self.url, "web socket message without numeric id dropped");
            return;
        };
        let Some(pending) = self.pending.lock().await.remove(&id) else {
            tracing::debug!(url = %self.url, id, "response for unknown request id dropped");
            return;
        };
        pending.timer.abort();
        tracing::trace!(url = %self.url, id, method = %pending.method, "response received");
        let _ = pending.tx.send(parse_response(response));
    }

    /// Fail pending requests of `generation` (all of them when `None`); returns how many.
    async fn fail_pending(&self, generation: Option<u64>) -> usize {
        let mut pending = self.pending.lock().await;
        let ids: Vec<u64> = pending
            .iter()
            .filter(|(_, p)| generation.map_or(true, |g| p.generation == g))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(p) = pending.remove(id) {
                p.timer.abort();
                let _ = p.tx.send(Err(TransportError::Disconnected));
            }
        }
        ids.len()
    }

    async fn connection_lost(this: &Arc<Self>, generation: u64, reason: String) {
        {
            let mut slot = this.connection.lock().await;
            if slot.as_ref().is_some_and(|c| c.generation == generation) {
                slot.take();
            }
        }
        let failed = this.fail_pending(Some(generation)).await;
        if this.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(url = %this.url, generation, failed, %reason, "web socket connection lost");
        if this.options.auto_reconnect {
            spawn_reconnect(Arc::downgrade(this));
        }
    }
}

async fn dial(url: &str, options: &TransportOptions) -> Result<WsStream, TransportError> {
    let connector = tls_connector(options)?;
    let (ws, _response) = connect_async_tls_with_config(url, None, false, connector).await?;
    Ok(ws)
}

/// Custom TLS only when the options ask for a client identity, an extra root or no verification.
fn tls_connector(options: &TransportOptions) -> Result<Option<Connector>, TransportError> {
    let custom = options.has_client_identity()
        || options.ca_cert_pem.is_some()
        || options.accept_invalid_certs;
    if !custom {
        return Ok(None);
    }
    let mut builder = native_tls::TlsConnector::builder();
    if let (Some(cert), Some(key)) = (&options.client_cert_pem, &options.client_key_pem) {
        let identity = native_tls::Identity::from_pkcs8(cert.as_bytes(), key.as_bytes())
            .map_err(|e| TransportError::Connect(format!("client identity: {e}")))?;
        builder.identity(identity);
    }
    if let Some(ca) = &options.ca_cert_pem {
        let root = native_tls::Certificate::from_pem(ca.as_bytes())
            .map_err(|e| TransportError::Connect(format!("CA certificate: {e}")))?;
        builder.add_root_certificate(root);
    }
    builder.danger_accept_invalid_certs(options.accept_invalid_certs);
    let connector = builder
        .build()
        .map_err(|e| TransportError::Connect(format!("TLS connector: {e}")))?;
    Ok(Some(Connector::NativeTls(connector)))
}

async fn drive(
    inner: Weak<Inner>,
    generation: u64,
    ws: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    let (mut sink, mut stream) = ws.split();
    let reason = loop {
        tokio::select! {
            out = outbound_rx.recv() => match out {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        break format!("send: {e}");
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match inner.upgrade() {
                    Some(inner) => inner.dispatch(&text).await,
                    None => return,
                },
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => format!("closed by peer: {} {}", f.code, f.reason),
                        None => "closed by peer".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("receive: {e}"),
                None => break "stream ended".to_string(),
            },
        }
    };
    // Callers must see the connection as closed before its pending requests are failed.
    outbound_rx.close();
    drop(outbound_rx);
    if let Some(inner) = inner.upgrade() {
        Inner::connection_lost(&inner, generation, reason).await;
    }
}

fn spawn_request_timer(inner: Weak<Inner>, id: u64, wait: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep(wait).await;
        let Some(inner) = inner.upgrade() else { return };
        let removed = inner.pending.lock().await.remove(&id);
        if let Some(p) = removed {
            tracing::warn!(url = %inner.url, id, method = %p.method, "request timed out");
            let _ = p.tx.send(Err(TransportError::Timeout));
        }
    })
}

fn spawn_reconnect(inner: Weak<Inner>) {
    let Some(strong) = inner.upgrade() else { return };
    if strong.reconnecting.swap(true, Ordering::SeqCst) {
        return;
    }
    drop(strong);
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let delay = match inner.upgrade() {
                Some(i) => i.options.reconnection.backoff(attempt),
                None => return,
            };
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
            sleep(delay + jitter).await;
            let Some(inner) = inner.upgrade() else { return };
            if inner.shutting_down.load(Ordering::SeqCst) {
                inner.reconnecting.store(false, Ordering::SeqCst);
                return;
            }
            let mut slot = inner.connection.lock().await;
            if slot.as_ref().is_some_and(|c| !c.outbound.is_closed()) {
                inner.reconnecting.store(false, Ordering::SeqCst);
                return;
            }
            match Inner::open(&inner, &mut slot).await {
                Ok(()) => {
                    inner.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                Err(e) => {
                    tracing::warn!(url = %inner.url, attempt, reason = %e, "web socket reconnect failed");
                }
            }
        }
    });
}
