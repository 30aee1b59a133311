//! The connection fabric and its WebSocket endpoints.
//!
//! - [`registry`] -- every live fabric socket, with liveness-checked sends.
//! - [`links`] -- which socket carries each VM's agent.
//! - [`subscriptions`] -- which dashboard sockets watch which VMs.
//! - [`agent`], [`monitor`], [`terminal`] -- the three upgrade endpoints.

pub mod agent;
pub mod fabric;
mod heartbeat;
pub mod links;
pub mod monitor;
pub mod registry;
pub mod subscriptions;
pub mod terminal;

pub use fabric::Fabric;
pub use heartbeat::start_heartbeat;
pub use links::VmLinkMap;
pub use registry::{ConnKind, ConnState, SocketId, SocketRegistry};
pub use subscriptions::{SubscriptionMap, VmSelection};
