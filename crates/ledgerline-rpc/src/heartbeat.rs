//! Streaming chain connection with application-level liveness checks.
//!
//! A [`HeartbeatSocket`] is a handle to a background task that owns the
//! transport (command-channel architecture: the handle sends [`Command`]s,
//! the task owns the sink and stream). The task pings every
//! `check_interval`; when a ping stays unanswered for `expected_pong_back`
//! the transport is dropped on the spot and the socket becomes
//! [`ConnectionState::Closed`]. A closed socket never reconnects and never
//! pings again; replacing it is the pool's job.
//!
//! Besides the heartbeat the task multiplexes JSON-RPC calls: every call gets
//! a fresh correlation id and a single-assignment reply cell, and inbound
//! frames are routed to the matching cell. Frames that answer no call are
//! published as subscription notifications.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use ledgerline_core::error::RpcError;
use ledgerline_core::traits::ConnectionStatus;
use ledgerline_core::types::{ConnectionState, RpcRequest, RpcResponse};

use crate::config::HeartbeatConfig;

/// JSON-RPC method name carried by subscription notifications.
pub const SUBSCRIPTION_METHOD: &str = "eth_subscription";

/// Buffered notifications per subscriber before the slowest one lags.
const NOTIFICATION_CAPACITY: usize = 1024;

/// Upper bound on an orderly close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

type ReplyCell = oneshot::Sender<Result<Value, RpcError>>;
type PendingCalls = Arc<Mutex<HashMap<u64, ReplyCell>>>;

/// Commands sent from the [`HeartbeatSocket`] handle to its task.
#[derive(Debug)]
enum Command {
    /// Write a text frame.
    Send(String),
    /// Close the transport with a close frame.
    Close,
}

/// Why the socket task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CloseReason {
    ConnectFailed(String),
    MissedPong,
    ClosedByPeer,
    StreamEnded,
    ClosedLocally,
    SendStalled,
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::MissedPong => f.write_str("missed pong"),
            Self::ClosedByPeer => f.write_str("closed by peer"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::ClosedLocally => f.write_str("closed locally"),
            Self::SendStalled => f.write_str("send stalled"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// One streaming connection to a chain node.
pub struct HeartbeatSocket {
    socket_id: u64,
    state_rx: watch::Receiver<ConnectionState>,
    command_tx: mpsc::UnboundedSender<Command>,
    pending: PendingCalls,
    next_call_id: AtomicU64,
    notifications: broadcast::Sender<Value>,
}

impl fmt::Debug for HeartbeatSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatSocket")
            .field("socket_id", &self.socket_id)
            .field("state", &*self.state_rx.borrow())
            .field("pending_calls", &self.pending.lock().len())
            .finish()
    }
}

impl HeartbeatSocket {
    /// Open a WebSocket connection to `url`.
    ///
    /// Returns immediately in [`ConnectionState::Connecting`]; the handshake
    /// runs on the background task. Must be called within a tokio runtime.
    pub fn connect(url: &str, config: HeartbeatConfig) -> Self {
        let url = url.to_string();
        Self::spawn(
            async move {
                let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
                    .await
                    .map_err(|e| RpcError::Transport(e.to_string()))?;
                Ok(ws.split())
            },
            config,
        )
    }

    /// Run the socket lifecycle over an arbitrary transport.
    ///
    /// The socket is `Connecting` until `connect` resolves, `Open` after a
    /// successful resolution and `Closed` once the transport is gone.
    pub fn spawn<F, Si, St, E>(connect: F, config: HeartbeatConfig) -> Self
    where
        F: Future<Output = Result<(Si, St), RpcError>> + Send + 'static,
        Si: Sink<Message> + Unpin + Send + 'static,
        Si::Error: fmt::Display,
        St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let socket_id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let driver = Driver {
            socket_id,
            config,
            state_tx,
            command_rx,
            pending: Arc::clone(&pending),
            notifications: notifications.clone(),
        };
        tokio::spawn(driver.run(connect));

        Self {
            socket_id,
            state_rx,
            command_tx,
            pending,
            next_call_id: AtomicU64::new(1),
            notifications,
        }
    }

    /// Process-unique identifier, used in logs.
    pub fn id(&self) -> u64 {
        self.socket_id
    }

    /// Watch the lifecycle state as it changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscription notifications (`params` of `eth_subscription` frames).
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    /// Issue a JSON-RPC call over the socket and wait for its response.
    ///
    /// Calls made while `Connecting` are queued until the socket opens.
    /// Fails with [`RpcError::ConnectionClosed`] if the socket closes first.
    pub async fn request(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        if self.state() == ConnectionState::Closed {
            return Err(RpcError::ConnectionClosed);
        }
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&RpcRequest::new(id, method, params))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(id, reply_tx);
        if self.command_tx.send(Command::Send(payload)).is_err() {
            self.pending.lock().remove(&id);
            return Err(RpcError::ConnectionClosed);
        }
        reply_rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
    }

    /// Ask the task to close the transport. No-op once closed.
    pub fn close(&self) {
        let _ = self.command_tx.send(Command::Close);
    }

    #[cfg(test)]
    pub(crate) fn stub(state: ConnectionState) -> (Self, watch::Sender<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(state);
        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(1);
        let socket = Self {
            socket_id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            state_rx,
            command_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_call_id: AtomicU64::new(1),
            notifications,
        };
        (socket, state_tx)
    }
}

impl ConnectionStatus for HeartbeatSocket {
    fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }
}

/// Background task owning the transport.
struct Driver {
    socket_id: u64,
    config: HeartbeatConfig,
    state_tx: watch::Sender<ConnectionState>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    pending: PendingCalls,
    notifications: broadcast::Sender<Value>,
}

impl Driver {
    async fn run<F, Si, St, E>(mut self, connect: F)
    where
        F: Future<Output = Result<(Si, St), RpcError>>,
        Si: Sink<Message> + Unpin,
        Si::Error: fmt::Display,
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let (mut sink, mut stream) = match connect.await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(socket = self.socket_id, error = %e, "socket failed to connect");
                self.shutdown(CloseReason::ConnectFailed(e.to_string()));
                return;
            }
        };
        self.state_tx.send_replace(ConnectionState::Open);
        info!(socket = self.socket_id, "socket open");

        let period = self.config.check_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Deadline of the oldest unanswered ping.
        let mut pong_deadline: Option<Instant> = None;

        let reason = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(reason) = self.write(&mut sink, Message::Ping(Vec::new())).await {
                        break reason;
                    }
                    trace!(socket = self.socket_id, "ping sent");
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.config.expected_pong_back);
                    }
                }
                _ = sleep_until_deadline(pong_deadline) => {
                    break CloseReason::MissedPong;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Pong(_))) => {
                        trace!(socket = self.socket_id, "pong received");
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(_))) => break CloseReason::ClosedByPeer,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseReason::Transport(e.to_string()),
                    None => break CloseReason::StreamEnded,
                },
                command = self.command_rx.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(reason) = self.write(&mut sink, Message::Text(text)).await {
                            break reason;
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                        break CloseReason::ClosedLocally;
                    }
                },
            }
        };

        if reason == CloseReason::SendStalled {
            warn!(socket = self.socket_id, "transport stopped accepting frames, terminating socket");
        }
        if reason == CloseReason::MissedPong {
            warn!(
                socket = self.socket_id,
                expected_pong_back = ?self.config.expected_pong_back,
                "no pong received in time, terminating socket"
            );
        }
        // Dropping both halves tears the transport down without a handshake.
        drop(sink);
        drop(stream);
        self.shutdown(reason);
    }

    /// Write one frame. A sink that accepts nothing for `expected_pong_back`
    /// counts as dead, the same as an unanswered ping.
    async fn write<Si>(&self, sink: &mut Si, message: Message) -> Result<(), CloseReason>
    where
        Si: Sink<Message> + Unpin,
        Si::Error: fmt::Display,
    {
        match time::timeout(self.config.expected_pong_back, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CloseReason::Transport(e.to_string())),
            Err(_) => Err(CloseReason::SendStalled),
        }
    }

    /// Route an inbound text frame to its call or to subscribers.
    fn dispatch(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(socket = self.socket_id, error = %e, "ignoring malformed frame");
                return;
            }
        };

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            let Some(reply) = self.pending.lock().remove(&id) else {
                debug!(socket = self.socket_id, id, "response for unknown call ignored");
                return;
            };
            let outcome = serde_json::from_value::<RpcResponse>(value)
                .map_err(RpcError::from)
                .and_then(RpcResponse::into_result);
            let _ = reply.send(outcome);
            return;
        }

        if value.get("method").and_then(Value::as_str) == Some(SUBSCRIPTION_METHOD) {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            let _ = self.notifications.send(params);
        }
    }

    fn shutdown(&mut self, reason: CloseReason) {
        // Close the command channel first so no call can slip in after the drain.
        self.command_rx.close();
        self.state_tx.send_replace(ConnectionState::Closed);

        let orphaned: Vec<ReplyCell> = self.pending.lock().drain().map(|(_, cell)| cell).collect();
        let failed_calls = orphaned.len();
        for cell in orphaned {
            let _ = cell.send(Err(RpcError::ConnectionClosed));
        }
        info!(socket = self.socket_id, %reason, failed_calls, "socket closed");
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
