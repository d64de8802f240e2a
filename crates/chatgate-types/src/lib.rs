//! Shared domain types for Chatgate.
//!
//! Configuration, client identity, admission outcomes, and their error types.
//!
//! Zero infrastructure dependencies -- only serde and thiserror.

pub mod config;
pub mod error;
pub mod limiter;
