use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::RwLock;
use vmwatch_core::types::DbId;

use crate::ws::registry::{ConnState, SocketId, SocketRegistry};

/// Maps each VM to the one socket currently carrying its agent.
///
/// At most one link exists per VM: linking again replaces the entry.
pub struct VmLinkMap {
    sockets: Arc<SocketRegistry>,
    links: RwLock<HashMap<DbId, SocketId>>,
}

impl VmLinkMap {
    pub fn new(sockets: Arc<SocketRegistry>) -> Self {
        Self {
            sockets,
            links: RwLock::new(HashMap::new()),
        }
    }

    /// Point `vm_id` at `socket_id`.
    ///
    /// Returns the socket this link superseded, if it was a different one.
    /// The superseded socket is not touched here.
    pub async fn link(&self, vm_id: DbId, socket_id: SocketId) -> Option<SocketId> {
        self.links
            .write()
            .await
            .insert(vm_id, socket_id)
            .filter(|prev| *prev != socket_id)
    }

    /// Remove the link for `vm_id`. Idempotent.
    pub async fn unlink(&self, vm_id: DbId) -> Option<SocketId> {
        self.links.write().await.remove(&vm_id)
    }

    /// Remove the link only if it still points at `socket_id`.
    ///
    /// A connection tearing down calls this so it can never drop the link of
    /// the connection that superseded it.
    pub async fn release(&self, vm_id: DbId, socket_id: SocketId) -> bool {
        let mut links = self.links.write().await;
        if links.get(&vm_id) == Some(&socket_id) {
            links.remove(&vm_id);
            return true;
        }
        false
    }

    pub async fn linked_socket(&self, vm_id: DbId) -> Option<SocketId> {
        self.links.read().await.get(&vm_id).copied()
    }

    /// Whether the VM's agent is connected right now.
    ///
    /// A link whose socket has left the registry is dropped as a side effect.
    pub async fn is_live(&self, vm_id: DbId) -> bool {
        let Some(socket_id) = self.linked_socket(vm_id).await else {
            return false;
        };
        match self.sockets.get(socket_id).await {
            Some(info) => info.state == ConnState::Open,
            None => {
                if self.release(vm_id, socket_id).await {
                    tracing::debug!(vm_id, conn_id = %socket_id, "Dropped stale agent link");
                }
                false
            }
        }
    }

    /// Send to the VM's agent. `false` when unlinked or the socket is gone.
    pub async fn send(&self, vm_id: DbId, message: Message) -> bool {
        match self.linked_socket(vm_id).await {
            Some(socket_id) => self.sockets.send(socket_id, message).await,
            None => false,
        }
    }

    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }
}
