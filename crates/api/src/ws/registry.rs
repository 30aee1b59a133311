use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;
use vmwatch_core::types::{DbId, Timestamp};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Opaque per-connection identifier, assigned at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(Uuid);

impl SocketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport state of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    /// Registered, writer task not yet running. Sends are queued.
    Connecting = 0,
    Open = 1,
    /// A close frame has been queued; no further sends are issued.
    Closing = 2,
    Closed = 3,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Which endpoint accepted the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Agent { vm_id: DbId },
    Monitor { user_id: DbId },
}

/// Point-in-time view of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub kind: ConnKind,
    pub state: ConnState,
    pub connected_at: Timestamp,
}

/// A single registered connection.
struct Connection {
    kind: ConnKind,
    state: AtomicU8,
    sender: WsSender,
    /// Payloads sent while connecting; `None` once the connection opened.
    pending: Mutex<Option<Vec<Message>>>,
    connected_at: Timestamp,
}

impl Connection {
    fn new(kind: ConnKind, sender: WsSender) -> Self {
        Self {
            kind,
            state: AtomicU8::new(ConnState::Connecting as u8),
            sender,
            pending: Mutex::new(Some(Vec::new())),
            connected_at: chrono::Utc::now(),
        }
    }

    fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            kind: self.kind,
            state: self.state(),
            connected_at: self.connected_at,
        }
    }

    fn send(&self, message: Message) -> bool {
        match self.state() {
            ConnState::Closing | ConnState::Closed => false,
            ConnState::Connecting => {
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                // `open` may have flushed the queue between the state read and the lock.
                match pending.as_mut() {
                    Some(queue) => {
                        queue.push(message);
                        true
                    }
                    None => {
                        drop(pending);
                        if matches!(self.state(), ConnState::Closing | ConnState::Closed) {
                            return false;
                        }
                        self.deliver(message)
                    }
                }
            }
            ConnState::Open => self.deliver(message),
        }
    }

    fn deliver(&self, message: Message) -> bool {
        if self.sender.send(message).is_err() {
            self.set_state(ConnState::Closed);
            return false;
        }
        true
    }

    fn open(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = pending.take() {
            for message in queue {
                if !self.deliver(message) {
                    return;
                }
            }
        }
        let _ = self.state.compare_exchange(
            ConnState::Connecting as u8,
            ConnState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn close(&self) -> bool {
        if matches!(self.state(), ConnState::Closing | ConnState::Closed) {
            return false;
        }
        self.set_state(ConnState::Closing);
        // Nothing queued while connecting may follow the close frame.
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.sender.send(Message::Close(None)).is_ok()
    }
}

/// A connection attached to the registry with its writer task running.
pub struct Attached {
    pub id: SocketId,
    /// Inbound half of the socket, read by the endpoint's receive loop.
    pub stream: SplitStream<WebSocket>,
    /// Forwards queued messages to the socket sink. Abort it on disconnect.
    pub writer: JoinHandle<()>,
}

/// Every live fabric connection, keyed by [`SocketId`].
///
/// The registry tracks liveness only; higher-level maps prune themselves
/// when a send here returns `false`.
pub struct SocketRegistry {
    connections: RwLock<HashMap<SocketId, Connection>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection in the `Connecting` state.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink. An id that is already present
    /// is replaced.
    pub async fn add(&self, id: SocketId, kind: ConnKind) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .connections
            .write()
            .await
            .insert(id, Connection::new(kind, tx))
            .is_some()
        {
            tracing::warn!(conn_id = %id, "Socket id registered twice, replacing");
        }
        rx
    }

    /// Mark a connection open and flush anything queued while connecting.
    pub async fn mark_open(&self, id: SocketId) -> bool {
        match self.connections.read().await.get(&id) {
            Some(conn) => {
                conn.open();
                true
            }
            None => false,
        }
    }

    /// Deregister a connection. Idempotent.
    pub async fn remove(&self, id: SocketId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    pub async fn get(&self, id: SocketId) -> Option<ConnectionInfo> {
        self.connections.read().await.get(&id).map(Connection::info)
    }

    /// Issue a send to `id`.
    ///
    /// Returns `false` when the connection is absent, closing, or closed;
    /// the registry itself is never mutated here. Payloads for a connection
    /// that is still connecting are held until it opens.
    pub async fn send(&self, id: SocketId, message: Message) -> bool {
        match self.connections.read().await.get(&id) {
            Some(conn) => conn.send(message),
            None => false,
        }
    }

    /// Queue a close frame and move the connection to `Closing`.
    pub async fn close(&self, id: SocketId) -> bool {
        match self.connections.read().await.get(&id) {
            Some(conn) => conn.close(),
            None => false,
        }
    }

    /// Send a Ping frame to every open connection.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            if conn.state() == ConnState::Open {
                conn.deliver(Message::Ping(Bytes::new()));
            }
        }
    }

    /// Return the current number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let agents = conns
            .values()
            .filter(|c| matches!(c.kind, ConnKind::Agent { .. }))
            .count();
        let monitors = conns.len() - agents;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(agents, monitors, "Closed all fabric connections");
    }

    /// Register an upgraded socket and start its writer task.
    ///
    /// The connection is open once this returns.
    pub async fn attach(&self, socket: WebSocket, kind: ConnKind) -> Attached {
        let id = SocketId::new();
        let mut rx = self.add(id, kind).await;
        let (mut sink, stream) = socket.split();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() {
                    tracing::debug!(conn_id = %id, "WebSocket sink closed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        self.mark_open(id).await;
        Attached { id, stream, writer }
    }
}

impl Default for SocketRegistry {
    fn default() -> Self {
        Self::new()
    }
}
