//! Admission-control core for Chatgate.
//!
//! Everything in this crate is in-memory, process-local, and synchronous on
//! the request path. It depends only on `chatgate-types`; the HTTP adapter
//! that calls into it lives in `chatgate-api`.

pub mod limiter;
