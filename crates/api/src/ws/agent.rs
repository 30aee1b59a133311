//! Agent ingestion endpoint.
//!
//! Agents authenticate with their per-VM secret before the upgrade, then push
//! `metrics` and `vm_info` frames. Each metrics sample is persisted and fanned
//! out to the VM's subscribers as `liveMetrics`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use vmwatch_core::protocol::{error_frame, AgentFrame, ServerMessage};
use vmwatch_core::types::DbId;
use vmwatch_db::models::vm_metric::MetricsSample;

use crate::auth::session::bearer_token;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::registry::{ConnKind, SocketId};

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    pub secret: Option<String>,
}

/// GET /api/v1/ws/agent?secret=...
///
/// Refuses the upgrade with 401 when the secret is missing or matches no VM,
/// so an unauthenticated agent never gets an open socket.
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let secret = query
        .secret
        .filter(|s| !s.is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_string))
        .ok_or_else(|| AppError::unauthorized("Missing agent secret"))?;

    let vm = state
        .store
        .find_vm_by_secret(&secret)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid agent secret"))?;

    Ok(ws.on_upgrade(move |socket| handle_agent_socket(socket, state, vm.id)))
}

async fn handle_agent_socket(socket: WebSocket, state: AppState, vm_id: DbId) {
    let fabric = &state.fabric;
    let mut conn = fabric
        .sockets
        .attach(socket, ConnKind::Agent { vm_id })
        .await;
    let conn_id = conn.id;

    if let Some(superseded) = fabric.links.link(vm_id, conn_id).await {
        tracing::info!(
            vm_id,
            conn_id = %conn_id,
            superseded = %superseded,
            "Agent reconnected, closing superseded connection"
        );
        fabric.sockets.close(superseded).await;
    }
    tracing::info!(vm_id, conn_id = %conn_id, "Agent connected");

    while let Some(result) = conn.stream.next().await {
        if matches!(result, Ok(Message::Binary(_) | Message::Text(_)))
            && fabric.links.linked_socket(vm_id).await != Some(conn_id)
        {
            tracing::debug!(vm_id, conn_id = %conn_id, "Dropping frame from superseded agent");
            break;
        }
        match result {
            Ok(Message::Binary(bytes)) => handle_frame(&state, vm_id, conn_id, &bytes).await,
            Ok(Message::Text(_)) => {
                reply_error(&state, conn_id, "Expected a binary MessagePack frame").await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(vm_id, conn_id = %conn_id, error = %e, "Agent receive error");
                break;
            }
        }
    }

    fabric.sockets.remove(conn_id).await;
    fabric.links.release(vm_id, conn_id).await;
    conn.writer.abort();
    tracing::info!(vm_id, conn_id = %conn_id, "Agent disconnected");
}

async fn handle_frame(state: &AppState, vm_id: DbId, conn_id: SocketId, bytes: &[u8]) {
    match AgentFrame::decode(bytes) {
        Ok(AgentFrame::Metrics(report)) => {
            let sample = MetricsSample::from_agent(vm_id, &report, Utc::now());
            let row = match state.store.insert_metrics(&sample).await {
                Ok(row) => row,
                Err(e) => {
                    tracing::error!(vm_id, error = %e, "Failed to persist metrics sample");
                    return;
                }
            };
            let frame = match (ServerMessage::LiveMetrics { vm_id, metrics: row }).encode() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(vm_id, error = %e, "Failed to encode liveMetrics");
                    return;
                }
            };
            let delivered = state
                .fabric
                .subscriptions
                .broadcast(vm_id, Message::Binary(frame.into()))
                .await;
            tracing::trace!(vm_id, delivered, "Broadcast live metrics");
        }
        Ok(AgentFrame::VmInfo(info)) => {
            if let Err(e) = state.store.update_vm_metadata(vm_id, &info).await {
                tracing::error!(vm_id, error = %e, "Failed to store VM metadata");
            }
        }
        Err(e) => {
            tracing::warn!(vm_id, conn_id = %conn_id, error = %e, "Rejected agent frame");
            reply_error(state, conn_id, e.to_string()).await;
        }
    }
}

async fn reply_error(state: &AppState, conn_id: SocketId, message: impl Into<String>) {
    match error_frame(message) {
        Ok(frame) => {
            state
                .fabric
                .sockets
                .send(conn_id, Message::Binary(frame.into()))
                .await;
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode error frame"),
    }
}
