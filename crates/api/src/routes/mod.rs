pub mod health;
pub mod vms;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /vms/{id}/status          agent liveness (GET, session required)
///
/// /ws/agent                 agent ingestion WebSocket (?secret=)
/// /ws/monitor               dashboard subscription WebSocket (session required)
/// /ws/terminal              SSH terminal WebSocket (?vmId=&cols=&rows=)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/vms", vms::router())
        .route("/ws/agent", get(ws::agent::agent_ws_handler))
        .route("/ws/monitor", get(ws::monitor::monitor_ws_handler))
        .route("/ws/terminal", get(ws::terminal::terminal_ws_handler))
}
