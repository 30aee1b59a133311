//! Dashboard subscription endpoint.
//!
//! Users subscribe to VMs (directly or through a page) and receive
//! `liveMetrics` pushes; `getMonitorMetrics` is a one-shot history query.
//! There is no error channel: undecodable or unknown commands are logged and
//! dropped.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::StreamExt;
use vmwatch_core::protocol::{MonitorCommand, MonitorTarget, ServerMessage};
use vmwatch_core::types::DbId;
use vmwatch_db::models::vm_metric::VmMetric;

use crate::auth::session::Session;
use crate::state::AppState;
use crate::ws::registry::{ConnKind, SocketId};
use crate::ws::subscriptions::VmSelection;

/// GET /api/v1/ws/monitor
///
/// The [`Session`] extractor refuses the upgrade with 401 when the caller
/// has no valid session.
pub async fn monitor_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    session: Session,
) -> Response {
    ws.on_upgrade(move |socket| handle_monitor_socket(socket, state, session))
}

async fn handle_monitor_socket(socket: WebSocket, state: AppState, session: Session) {
    let fabric = &state.fabric;
    let mut conn = fabric
        .sockets
        .attach(
            socket,
            ConnKind::Monitor {
                user_id: session.user_id,
            },
        )
        .await;
    let conn_id = conn.id;
    tracing::info!(conn_id = %conn_id, user_id = session.user_id, "Monitor connected");

    while let Some(result) = conn.stream.next().await {
        match result {
            Ok(Message::Binary(bytes)) => match MonitorCommand::decode(&bytes) {
                Ok(command) => handle_command(&state, conn_id, command).await,
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Ignoring monitor frame");
                }
            },
            Ok(Message::Text(_)) => {
                tracing::debug!(conn_id = %conn_id, "Ignoring text frame on monitor socket");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "Monitor receive error");
                break;
            }
        }
    }

    fabric
        .subscriptions
        .unlisten(conn_id, VmSelection::All)
        .await;
    fabric.sockets.remove(conn_id).await;
    conn.writer.abort();
    tracing::info!(conn_id = %conn_id, user_id = session.user_id, "Monitor disconnected");
}

async fn handle_command(state: &AppState, conn_id: SocketId, command: MonitorCommand) {
    match command {
        MonitorCommand::StartMonitor(target) => {
            let vm_ids = match target {
                MonitorTarget::VmIds { vm_ids } => vm_ids,
                MonitorTarget::Page { page_id } => resolve_page(state, page_id).await,
            };
            state.fabric.subscriptions.listen(conn_id, &vm_ids).await;
            tracing::debug!(conn_id = %conn_id, ?vm_ids, "Monitoring VMs");
            reply(state, conn_id, ServerMessage::Monitoring { vm_ids }).await;
        }
        MonitorCommand::StopMonitor(vm_ids) => {
            let selection = vm_ids.map_or(VmSelection::All, VmSelection::Only);
            state
                .fabric
                .subscriptions
                .unlisten(conn_id, selection)
                .await;
        }
        MonitorCommand::GetMonitorMetrics(request) => {
            match state
                .store
                .list_metrics(&request.vm_ids, request.effective_limit())
                .await
            {
                Ok(rows) => reply(state, conn_id, ServerMessage::MonitorMetrics(rows)).await,
                Err(e) => {
                    tracing::error!(conn_id = %conn_id, error = %e, "Failed to load monitor metrics");
                }
            }
        }
    }
}

async fn resolve_page(state: &AppState, page_id: DbId) -> Vec<DbId> {
    state
        .store
        .resolve_page_vm_ids(page_id)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(page_id, error = %e, "Failed to resolve page VMs");
            Vec::new()
        })
}

async fn reply(state: &AppState, conn_id: SocketId, message: ServerMessage<VmMetric>) {
    match message.encode() {
        Ok(frame) => {
            state
                .fabric
                .sockets
                .send(conn_id, Message::Binary(frame.into()))
                .await;
        }
        Err(e) => tracing::error!(conn_id = %conn_id, error = %e, "Failed to encode reply"),
    }
}
