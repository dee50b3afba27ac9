//! Connection lifecycle shared by the SDK and browser endpoints: the
//! authenticated upgrade, the socket writer task, ping/pong liveness and
//! graceful shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use cg_common::config::GatewayConfig;
use cg_protocol::{headers, PING_TIMEOUT_CODE, SERVER_UPDATE_CODE};

use super::registry::WsSender;

/// How long a closing socket gets to flush queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// The parts of the upgrade request the protocols authenticate against.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
}

impl UpgradeRequest {
    /// A header value as text. Missing and non-text values are both `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// A non-empty query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Why an upgrade was refused. `code` is a short mnemonic clients match on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({code})")]
pub struct ConnectionError {
    pub code: &'static str,
    pub message: String,
}

impl ConnectionError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// One WebSocket endpoint.
pub trait Protocol: Send + Sync + 'static {
    type Client: Send + 'static;

    fn authenticate(
        &self,
        request: &UpgradeRequest,
    ) -> impl Future<Output = Result<Self::Client, ConnectionError>> + Send;

    fn on_connection(
        self: Arc<Self>,
        socket: WebSocket,
        client: Self::Client,
    ) -> impl Future<Output = ()> + Send;
}

/// Authenticate first; only then complete the WebSocket handshake.
pub async fn handle_upgrade<P: Protocol>(
    protocol: Arc<P>,
    ws: WebSocketUpgrade,
    request: UpgradeRequest,
) -> Response {
    match protocol.authenticate(&request).await {
        Ok(client) => ws.on_upgrade(move |socket| protocol.on_connection(socket, client)),
        Err(error) => {
            tracing::info!(code = error.code, reason = %error.message, "WebSocket upgrade rejected");
            rejection_response(&error)
        }
    }
}

pub fn rejection_response(error: &ConnectionError) -> Response {
    let mut response = (StatusCode::BAD_REQUEST, "Bad Request").into_response();
    let headers_mut = response.headers_mut();

    if let Ok(reason) = HeaderValue::from_str(&urlencoding::encode(&error.message)) {
        headers_mut.insert(headers::ERROR_REASON, reason);
    }
    if let Ok(code) = HeaderValue::from_str(error.code) {
        headers_mut.insert(headers::ERROR_CODE, code);
    }

    response
}

pub fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

// ─── Liveness ────────────────────────────────────────────────

/// Handle to a running ping loop. The loop stops when this is dropped.
pub struct Liveness {
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Liveness {
    pub fn record_pong(&self) {
        self.alive.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Ping now, then every `period`. If no pong arrived since the previous
/// ping, call `on_not_alive` and stop instead of pinging again.
pub fn ping_on_interval<F>(tx: WsSender, period: Duration, on_not_alive: F) -> Liveness
where
    F: FnOnce() + Send + 'static,
{
    let alive = Arc::new(AtomicBool::new(false));
    let flag = alive.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // First tick completes immediately.
        ticker.tick().await;
        if tx.send(Message::Ping(Bytes::new())).is_err() {
            return;
        }

        loop {
            ticker.tick().await;
            if !flag.swap(false, Ordering::AcqRel) {
                on_not_alive();
                return;
            }
            if tx.send(Message::Ping(Bytes::new())).is_err() {
                return;
            }
        }
    });

    Liveness { alive, task }
}

// ─── Sockets ─────────────────────────────────────────────────

/// An accepted socket: a sender for outbound frames, the inbound stream,
/// and the tasks that keep it alive.
pub struct Socket {
    id: Uuid,
    pub tx: WsSender,
    receiver: SplitStream<WebSocket>,
    writer: JoinHandle<()>,
    liveness: Liveness,
    dead: oneshot::Receiver<()>,
}

/// State shared by every socket of one endpoint.
pub struct WsBase {
    clients: DashMap<Uuid, WsSender>,
    ping_interval: Duration,
    shutdown_timeout: Duration,
}

impl WsBase {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            clients: DashMap::new(),
            ping_interval: config.ping_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Start the writer task and the ping loop for a freshly upgraded socket.
    pub fn open(&self, socket: WebSocket) -> Socket {
        let (mut sink, receiver) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        // Forward channel → WebSocket
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (dead_tx, dead) = oneshot::channel();
        let liveness = ping_on_interval(tx.clone(), self.ping_interval, move || {
            let _ = dead_tx.send(());
        });

        let id = self.track(tx.clone());

        Socket {
            id,
            tx,
            receiver,
            writer,
            liveness,
            dead,
        }
    }

    /// Pump inbound frames into `on_message` until the peer closes, the
    /// stream fails, or the liveness check gives up on it.
    pub async fn run<F>(&self, socket: &mut Socket, mut on_message: F)
    where
        F: FnMut(Bytes),
    {
        loop {
            tokio::select! {
                timed_out = &mut socket.dead => {
                    if timed_out.is_ok() {
                        tracing::info!(socket = %socket.id, "Ping timeout, terminating connection");
                        let _ = socket.tx.send(close_message(PING_TIMEOUT_CODE, "Ping timeout"));
                    }
                    break;
                }
                msg = socket.receiver.next() => match msg {
                    Some(Ok(Message::Binary(data))) => on_message(data),
                    Some(Ok(Message::Pong(_))) => socket.liveness.record_pong(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(socket = %socket.id, error = %e, "WebSocket receive error");
                        break;
                    }
                },
            }
        }
    }

    /// Stop pinging and let the writer flush. Callers drop every other clone
    /// of `socket.tx` (registry entries) before calling this.
    pub async fn finish(&self, socket: Socket) {
        let Socket {
            id,
            tx,
            writer,
            liveness,
            ..
        } = socket;

        liveness.stop();
        drop(tx);
        self.untrack(&id);

        let abort = writer.abort_handle();
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
            abort.abort();
        }
    }

    /// Ask every socket to close with the server-update code and wait for
    /// them to finish, bounded by the shutdown timeout.
    pub async fn handle_sigterm(&self) {
        for client in self.clients.iter() {
            let _ = client
                .value()
                .send(close_message(SERVER_UPDATE_CODE, "Server update in progress."));
        }

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while !self.clients.is_empty() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = self.clients.len(),
                "WebSocket server close timed out"
            );
        }
    }

    pub fn open_sockets(&self) -> usize {
        self.clients.len()
    }

    fn track(&self, tx: WsSender) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.insert(id, tx);
        id
    }

    fn untrack(&self, id: &Uuid) {
        self.clients.remove(id);
    }
}
