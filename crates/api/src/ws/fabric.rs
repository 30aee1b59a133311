use std::sync::Arc;

use crate::ws::links::VmLinkMap;
use crate::ws::registry::SocketRegistry;
use crate::ws::subscriptions::SubscriptionMap;

/// The process-wide connection fabric.
///
/// Built exactly once at startup and shared through `AppState`. The socket
/// registry is created first; the link and subscription maps hold the same
/// registry so liveness checks and pruning agree on one view of the sockets.
pub struct Fabric {
    pub sockets: Arc<SocketRegistry>,
    pub links: VmLinkMap,
    pub subscriptions: SubscriptionMap,
}

impl Fabric {
    pub fn new() -> Arc<Self> {
        let sockets = Arc::new(SocketRegistry::new());
        Arc::new(Self {
            links: VmLinkMap::new(Arc::clone(&sockets)),
            subscriptions: SubscriptionMap::new(Arc::clone(&sockets)),
            sockets,
        })
    }
}
