//! Browser terminal bridged to an SSH shell on a VM.
//!
//! The target is resolved before the upgrade, but refusals are delivered
//! after it as a plain-text `[ERROR] ...` line followed by a close, so the
//! terminal widget can show them. Shell output is forwarded as binary frames.

mod input;
mod ssh;

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{interval_at, Instant};
use vmwatch_core::types::DbId;
use vmwatch_db::models::vm::SshCredentials;

use crate::auth::session::session_from_headers;
use crate::state::AppState;

pub use input::{TerminalInput, TerminalSize};
pub use ssh::{BridgeError, SshConfig, SshEvent, SshSession};

/// Sent when the remote shell closes the channel.
pub const CLOSED_NOTICE: &str = "\r\n[INFO] SSH session closed\r\n";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalQuery {
    pub vm_id: Option<String>,
    pub cols: Option<String>,
    pub rows: Option<String>,
}

/// Why a terminal upgrade is answered with an error line instead of a shell.
#[derive(Debug, thiserror::Error)]
pub enum TerminalRefusal {
    #[error("[ERROR] Unauthorized")]
    Unauthorized,
    #[error("[ERROR] Missing server id")]
    MissingVmId,
    #[error("[ERROR] Server not found")]
    VmNotFound,
    #[error("[ERROR] No SSH key or password available for this server")]
    NoCredentials,
    #[error("[ERROR] Failed to load server")]
    Store(#[from] sqlx::Error),
}

struct TerminalTarget {
    vm_id: DbId,
    user_id: DbId,
    credentials: SshCredentials,
}

/// GET /api/v1/ws/terminal?vmId=..&cols=..&rows=..
pub async fn terminal_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TerminalQuery>,
    headers: HeaderMap,
) -> Response {
    let target = resolve_target(&state, &headers, &query).await;
    let size = TerminalSize::from_query(query.cols.as_deref(), query.rows.as_deref());

    ws.on_upgrade(move |socket| async move {
        match target {
            Ok(target) => run_bridge(socket, state, target, size).await,
            Err(refusal) => {
                tracing::info!(reason = %refusal, "Terminal session refused");
                refuse(socket, &refusal.to_string()).await;
            }
        }
    })
}

async fn resolve_target(
    state: &AppState,
    headers: &HeaderMap,
    query: &TerminalQuery,
) -> Result<TerminalTarget, TerminalRefusal> {
    let session =
        session_from_headers(headers, &state.config.jwt).ok_or(TerminalRefusal::Unauthorized)?;

    let vm_id: DbId = query
        .vm_id
        .as_deref()
        .and_then(|v| v.trim().parse().ok())
        .ok_or(TerminalRefusal::MissingVmId)?;

    if state.store.find_vm_by_id(vm_id).await?.is_none() {
        return Err(TerminalRefusal::VmNotFound);
    }

    let credentials = state
        .store
        .get_vm_ssh_credentials(vm_id)
        .await?
        .ok_or(TerminalRefusal::NoCredentials)?;

    Ok(TerminalTarget {
        vm_id,
        user_id: session.user_id,
        credentials,
    })
}

async fn refuse(mut socket: WebSocket, line: &str) {
    let _ = socket.send(Message::Text(line.into())).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn run_bridge(socket: WebSocket, state: AppState, target: TerminalTarget, size: TerminalSize) {
    let TerminalTarget {
        vm_id,
        user_id,
        credentials,
    } = target;
    let shutdown = state.shutdown.clone();
    let (mut sink, mut stream) = socket.split();

    tracing::info!(
        vm_id,
        user_id,
        host = %credentials.host,
        cols = size.cols,
        rows = size.rows,
        "Opening terminal session"
    );

    let opened = tokio::select! {
        () = shutdown.cancelled() => {
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
        opened = SshSession::open(&credentials, size, &state.config.ssh) => opened,
    };
    let mut session = match opened {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(vm_id, user_id, error = %e, "SSH session failed");
            let _ = sink.send(Message::Text(e.user_message().into())).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::info!(vm_id, user_id, "Terminal session ready");

    pump(&mut session, &mut sink, &mut stream, &state).await;

    session.close().await;
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    tracing::info!(vm_id, user_id, "Terminal session closed");
}

/// Shuttle bytes both ways until either side closes or the server shuts down.
async fn pump(
    session: &mut SshSession,
    sink: &mut SplitSink<WebSocket, Message>,
    stream: &mut SplitStream<WebSocket>,
    state: &AppState,
) {
    let period = Duration::from_secs(state.config.terminal_ping_interval_secs.max(1));
    let mut ping = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            event = session.next_event() => match event {
                SshEvent::Output(bytes) => {
                    if sink.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                SshEvent::Closed => {
                    let _ = sink.send(Message::Text(CLOSED_NOTICE.into())).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Binary(bytes))) => {
                    if !forward_input(session, sink, &bytes).await {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if !forward_input(session, sink, text.as_str().as_bytes()).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Terminal receive error");
                    break;
                }
            },
        }
    }
}

/// Apply one inbound frame to the shell. Returns `false` once the socket is gone.
async fn forward_input(
    session: &mut SshSession,
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &[u8],
) -> bool {
    let result = match TerminalInput::parse(frame) {
        TerminalInput::Resize(size) => session.resize(size).await,
        TerminalInput::Write(data) => session.write(data.as_bytes()).await,
        TerminalInput::Raw(bytes) => session.write(&bytes).await,
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to write to terminal");
            sink.send(Message::Text(e.write_failure_line().into()))
                .await
                .is_ok()
        }
    }
}
