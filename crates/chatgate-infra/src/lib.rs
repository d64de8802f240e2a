//! Infrastructure layer for Chatgate.
//!
//! Everything that touches the filesystem lives here so that `chatgate-core`
//! stays pure: currently configuration discovery and loading.

pub mod config;
