//! vmwatch API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes, the
//! connection fabric and its WebSocket endpoints) so integration tests and
//! the binary entrypoint can both access them.

pub mod auth;
pub mod background;
pub mod config;
pub mod error;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;
