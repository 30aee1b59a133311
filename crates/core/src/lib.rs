//! Storage-free domain logic shared by the `vmwatch` crates.
//!
//! - [`types`] -- id and timestamp aliases.
//! - [`error`] -- the domain error enum.
//! - [`protocol`] -- the agent / dashboard wire protocol.
//! - [`secret`] -- agent secret hashing.

pub mod error;
pub mod protocol;
pub mod secret;
pub mod types;
