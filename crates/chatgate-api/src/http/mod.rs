//! HTTP layer for Chatgate.
//!
//! Axum router with per-client admission control in front of every route,
//! envelope response format, and CORS support.

pub mod admission;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
