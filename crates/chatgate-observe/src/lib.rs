//! Observability setup for Chatgate: structured logging via `tracing`, with an
//! optional OpenTelemetry bridge.

pub mod tracing_setup;
