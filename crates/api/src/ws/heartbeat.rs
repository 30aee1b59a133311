use std::sync::Arc;
use std::time::Duration;

use crate::ws::fabric::Fabric;

/// Spawn a background task that sends periodic Ping frames to every fabric
/// connection.
///
/// The returned `JoinHandle` is aborted during shutdown.
pub fn start_heartbeat(fabric: Arc<Fabric>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            let count = fabric.sockets.connection_count().await;
            tracing::debug!(count, "Fabric heartbeat ping");
            fabric.sockets.ping_all().await;
        }
    })
}
