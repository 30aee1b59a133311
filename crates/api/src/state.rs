use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::store::MonitorStore;
use crate::ws::Fabric;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// VM, page and metrics persistence.
    pub store: Arc<dyn MonitorStore>,
    pub config: Arc<ServerConfig>,
    /// Socket registry, VM links and subscriptions; one per process.
    pub fabric: Arc<Fabric>,
    /// Cancelled on shutdown; ends every terminal bridge.
    pub shutdown: CancellationToken,
}
