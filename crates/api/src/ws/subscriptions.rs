use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::RwLock;
use vmwatch_core::types::DbId;

use crate::ws::registry::{SocketId, SocketRegistry};

/// Which subscriptions an `unlisten` drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmSelection {
    All,
    Only(Vec<DbId>),
}

#[derive(Default)]
struct Subscriptions {
    by_vm: HashMap<DbId, HashSet<SocketId>>,
    /// Reverse index so a disconnect can drop everything a socket holds.
    by_socket: HashMap<SocketId, HashSet<DbId>>,
}

impl Subscriptions {
    fn drop_pair(&mut self, socket_id: SocketId, vm_id: DbId) {
        if let Some(set) = self.by_vm.get_mut(&vm_id) {
            set.remove(&socket_id);
            if set.is_empty() {
                self.by_vm.remove(&vm_id);
            }
        }
        if let Some(set) = self.by_socket.get_mut(&socket_id) {
            set.remove(&vm_id);
            if set.is_empty() {
                self.by_socket.remove(&socket_id);
            }
        }
    }
}

/// Which sockets are watching which VMs.
///
/// Both directions live under one lock, so listen, unlisten and the pruning
/// done by [`broadcast`](Self::broadcast) are mutually atomic.
pub struct SubscriptionMap {
    sockets: Arc<SocketRegistry>,
    inner: RwLock<Subscriptions>,
}

impl SubscriptionMap {
    pub fn new(sockets: Arc<SocketRegistry>) -> Self {
        Self {
            sockets,
            inner: RwLock::new(Subscriptions::default()),
        }
    }

    /// Subscribe `socket_id` to every VM in `vm_ids`. Repeats are no-ops.
    pub async fn listen(&self, socket_id: SocketId, vm_ids: &[DbId]) {
        if vm_ids.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        for &vm_id in vm_ids {
            inner.by_vm.entry(vm_id).or_default().insert(socket_id);
            inner.by_socket.entry(socket_id).or_default().insert(vm_id);
        }
    }

    pub async fn unlisten(&self, socket_id: SocketId, selection: VmSelection) {
        let mut inner = self.inner.write().await;
        let vm_ids: Vec<DbId> = match selection {
            VmSelection::All => inner
                .by_socket
                .get(&socket_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
            VmSelection::Only(ids) => ids,
        };
        for vm_id in vm_ids {
            inner.drop_pair(socket_id, vm_id);
        }
    }

    /// Send `message` to every current subscriber of `vm_id`.
    ///
    /// Subscribers whose send fails are removed before this returns and are
    /// never retried. Returns the number of sends issued.
    pub async fn broadcast(&self, vm_id: DbId, message: Message) -> usize {
        let mut inner = self.inner.write().await;
        let Some(targets) = inner.by_vm.get(&vm_id) else {
            return 0;
        };
        let targets: Vec<SocketId> = targets.iter().copied().collect();

        let mut delivered = 0;
        for socket_id in targets {
            if self.sockets.send(socket_id, message.clone()).await {
                delivered += 1;
            } else {
                tracing::debug!(vm_id, conn_id = %socket_id, "Pruning dead subscriber");
                inner.drop_pair(socket_id, vm_id);
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self, vm_id: DbId) -> usize {
        self.inner
            .read()
            .await
            .by_vm
            .get(&vm_id)
            .map_or(0, HashSet::len)
    }

    /// VMs `socket_id` is subscribed to, ascending.
    pub async fn subscriptions_of(&self, socket_id: SocketId) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self
            .inner
            .read()
            .await
            .by_socket
            .get(&socket_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}
