//! Authentication primitives.
//!
//! - [`jwt`] -- JWT access-token generation and validation.
//! - [`session`] -- resolving a dashboard session from request headers.

pub mod jwt;
pub mod session;
