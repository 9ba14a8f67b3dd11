//! WebSocket connection: one background task per dialed socket.
//!
//! ```text
//! WsConnection ──┐                          ┌──► pending requests (oneshot)
//! WsTransport  ──┼── cmd channel ──► ws_task ┤
//! handles      ──┘                          └──► SubscriptionManager (mpsc + error signal)
//! ```
//!
//! The task never reconnects. When the socket fails, every pending request
//! fails with [`TransportError::Closed`] and every subscription's error
//! signal fires once; redialing is the subscriber loop's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainsub_core::request::IncomingMessage;
use chainsub_core::{
    BlockTag, Connection, Connector, EthClient, HealthStatus, Header, JsonRpcRequest,
    JsonRpcResponse, Log, LogFilter, RpcId, RpcTransport, Subscription, SubscriptionHandle,
    TransportError,
};

use crate::subscriptions::{SubscriptionEntry, SubscriptionId, SubscriptionManager};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration for WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Upper bound on the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Upper bound on a single request, `eth_subscribe` included.
    pub request_timeout: Duration,
    /// Upper bound on the best-effort `eth_unsubscribe`, which runs on the
    /// shutdown path.
    pub unsubscribe_timeout: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            unsubscribe_timeout: Duration::from_secs(1),
        }
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

/// Command sent from callers to the background WS task.
enum WsCommand {
    Request { req: JsonRpcRequest, pending: Pending },
    Close,
}

/// What to do with the answer to an in-flight request.
enum Pending {
    Call(oneshot::Sender<Result<JsonRpcResponse, TransportError>>),
    /// `eth_subscribe`: on success the entry is registered before the next
    /// frame is read, so no notification can outrun its registration.
    Subscribe {
        entry: SubscriptionEntry,
        reply: oneshot::Sender<Result<SubscriptionId, TransportError>>,
    },
}

impl Pending {
    fn fail(self, err: TransportError) {
        match self {
            Self::Call(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Subscribe { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// In-flight requests keyed by wire id, with the caller's original id.
type PendingMap = HashMap<u64, (RpcId, Pending)>;

// ─── Connector ───────────────────────────────────────────────────────────────

/// Dials `ws://` / `wss://` endpoints.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: WsClientConfig,
}

impl WsConnector {
    pub fn new(config: WsClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn dial(&self, url: &str) -> Result<WsConnection, TransportError> {
        WsConnection::connect(url, self.config.clone()).await
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Request/response handle onto a connection's background task.
#[derive(Clone)]
pub struct WsTransport {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    request_timeout: Duration,
    unsubscribe_timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl WsTransport {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request<R>(
        &self,
        req: JsonRpcRequest,
        pending: Pending,
        rx: oneshot::Receiver<Result<R, TransportError>>,
    ) -> Result<R, TransportError> {
        self.cmd_tx
            .send(WsCommand::Request { req, pending })
            .map_err(|_| TransportError::Closed)?;
        match time::timeout(self.request_timeout, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    /// `eth_subscribe(params…)`, registering `entry` under the returned id.
    async fn subscribe(
        &self,
        params: Vec<Value>,
        entry: SubscriptionEntry,
    ) -> Result<SubscriptionId, TransportError> {
        let req = JsonRpcRequest::new(self.next_id(), "eth_subscribe", params);
        let (reply, rx) = oneshot::channel();
        self.request(req, Pending::Subscribe { entry, reply }, rx).await
    }

    fn close(&self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl RpcTransport for WsTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.request(req, Pending::Call(tx), rx).await
    }

    fn health(&self) -> HealthStatus {
        if self.cmd_tx.is_closed() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

// ─── Connection ──────────────────────────────────────────────────────────────

/// One live WebSocket session.
pub struct WsConnection {
    eth: EthClient<WsTransport>,
    subscriptions: SubscriptionManager,
}

impl WsConnection {
    /// Perform the handshake and start the background task.
    pub async fn connect(url: &str, config: WsClientConfig) -> Result<Self, TransportError> {
        let handshake = tokio_tungstenite::connect_async(url);
        let (ws, _) = match time::timeout(config.connect_timeout, handshake).await {
            Ok(res) => res.map_err(|e| TransportError::WebSocket(e.to_string()))?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    ms: config.connect_timeout.as_millis() as u64,
                })
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new();
        tokio::spawn(ws_task(url.to_string(), ws, cmd_rx, subscriptions.clone()));

        let transport = WsTransport {
            url: url.to_string(),
            cmd_tx,
            request_timeout: config.request_timeout,
            unsubscribe_timeout: config.unsubscribe_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        Ok(Self {
            eth: EthClient::new(transport),
            subscriptions,
        })
    }

    /// Typed JSON-RPC calls over this socket.
    pub fn eth(&self) -> &EthClient<WsTransport> {
        &self.eth
    }

    fn transport(&self) -> &WsTransport {
        self.eth.transport()
    }

    async fn subscribe<T: Send + 'static>(
        &self,
        kind: &'static str,
        params: Vec<Value>,
        decode: fn(&Value) -> Option<T>,
    ) -> Result<Subscription<T>, TransportError> {
        let (entry, items, errors) = SubscriptionEntry::new(kind, decode);
        let id = self.transport().subscribe(params, entry).await?;
        tracing::debug!(%id, kind, "subscription registered");
        let handle = WsSubscriptionHandle {
            id,
            transport: self.transport().clone(),
            subscriptions: self.subscriptions.clone(),
            errors: Some(errors),
        };
        Ok(Subscription::new(items, Box::new(handle)))
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn header_at(&self, tag: BlockTag) -> Result<Header, TransportError> {
        self.eth.header_at(tag).await
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>, TransportError> {
        self.subscribe("newHeads", vec![json!("newHeads")], Header::from_json).await
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<Subscription<Log>, TransportError> {
        self.subscribe("logs", vec![json!("logs"), filter.to_param()], Log::from_json)
            .await
    }

    async fn close(&self) {
        self.transport().close();
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.transport().close();
    }
}

// ─── Subscription handle ─────────────────────────────────────────────────────

struct WsSubscriptionHandle {
    id: SubscriptionId,
    transport: WsTransport,
    subscriptions: SubscriptionManager,
    errors: Option<oneshot::Receiver<TransportError>>,
}

#[async_trait]
impl SubscriptionHandle for WsSubscriptionHandle {
    async fn error_signal(&mut self) -> TransportError {
        if let Some(rx) = self.errors.as_mut() {
            let res = rx.await;
            self.errors = None;
            if let Ok(err) = res {
                return err;
            }
        }
        // Sender dropped without firing: the subscription was removed quietly.
        std::future::pending().await
    }

    async fn unsubscribe(&mut self) {
        self.errors = None;
        if !self.subscriptions.remove(&self.id) {
            return;
        }
        let req = JsonRpcRequest::new(
            self.transport.next_id(),
            "eth_unsubscribe",
            vec![json!(self.id.0)],
        );
        let limit = self.transport.unsubscribe_timeout;
        match time::timeout(limit, self.transport.send(req)).await {
            Ok(Ok(resp)) if resp.is_ok() => tracing::debug!(id = %self.id, "unsubscribed"),
            Ok(Ok(resp)) => {
                tracing::debug!(id = %self.id, error = ?resp.error, "eth_unsubscribe rejected")
            }
            Ok(Err(e)) => tracing::debug!(id = %self.id, error = %e, "eth_unsubscribe failed"),
            Err(_) => tracing::debug!(
                id = %self.id,
                timeout_ms = limit.as_millis() as u64,
                "no answer to eth_unsubscribe, giving up"
            ),
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

/// Owns the socket until it fails or a `Close` command arrives.
async fn ws_task(
    url: String,
    ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: SubscriptionManager,
) {
    let (mut sink, mut stream) = ws.split();
    let mut pending = PendingMap::new();
    let mut next_wire_id = 1u64;

    let failure = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(WsCommand::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
                Some(WsCommand::Request { mut req, pending: p }) => {
                    let wire = next_wire_id;
                    next_wire_id += 1;
                    let original = std::mem::replace(&mut req.id, RpcId::Number(wire));
                    let text = match serde_json::to_string(&req) {
                        Ok(text) => text,
                        Err(e) => {
                            p.fail(e.into());
                            continue;
                        }
                    };
                    pending.insert(wire, (original, p));
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break Some(TransportError::WebSocket(e.to_string()));
                    }
                }
            },
            msg = stream.next() => match msg {
                None => break Some(TransportError::Closed),
                Some(Err(e)) => break Some(TransportError::WebSocket(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    handle_text(text.as_str(), &mut pending, &subscriptions);
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(url = %url, ?frame, "close frame from node");
                    break Some(TransportError::Closed);
                }
                // Pongs to pings are queued by tungstenite and flushed on the next read.
                Some(Ok(_)) => {}
            },
        }
    };

    for (_, (_, p)) in pending.drain() {
        p.fail(TransportError::Closed);
    }
    match failure {
        Some(err) => {
            tracing::warn!(
                url = %url,
                error = %err,
                subscriptions = subscriptions.len(),
                "WS connection lost"
            );
            subscriptions.fail_all(&err);
        }
        None => {
            subscriptions.clear();
            tracing::debug!(url = %url, "WS connection closed");
        }
    }
}

/// Route one text frame to its pending request or subscription.
fn handle_text(text: &str, pending: &mut PendingMap, subscriptions: &SubscriptionManager) {
    let Some(msg) = IncomingMessage::parse(text) else {
        tracing::debug!("ignoring unrecognised WS frame");
        return;
    };

    let mut resp = match msg {
        IncomingMessage::Notification(params) => {
            let id = SubscriptionId(params.subscription);
            if !subscriptions.dispatch(&id, params.result) {
                tracing::debug!(%id, "notification for unknown subscription");
            }
            return;
        }
        IncomingMessage::Response(resp) => resp,
    };

    let Some((original, p)) = resp.id.as_number().and_then(|wire| pending.remove(&wire)) else {
        tracing::debug!(id = ?resp.id, "response for unknown request");
        return;
    };
    resp.id = original;

    match p {
        Pending::Call(tx) => {
            let _ = tx.send(Ok(resp));
        }
        Pending::Subscribe { entry, reply } => {
            let kind = entry.kind();
            let id = resp
                .into_result()
                .map_err(TransportError::Rpc)
                .and_then(|v| match v {
                    Value::String(s) => Ok(SubscriptionId(s)),
                    other => Err(TransportError::Deserialization(format!(
                        "eth_subscribe({kind}) returned {other}"
                    ))),
                });
            let answer = id.map(|id| {
                subscriptions.insert(id.clone(), entry);
                id
            });
            let _ = reply.send(answer);
        }
    }
}
