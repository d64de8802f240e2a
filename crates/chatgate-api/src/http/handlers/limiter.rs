//! Limiter status endpoint.
//!
//! GET /api/v1/limiter - Effective rate-limit policy and tracked client count.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use chatgate_types::config::ClientKeySource;

use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Snapshot of the admission-control layer.
#[derive(Debug, Serialize)]
pub struct LimiterStatus {
    pub enabled: bool,
    pub tracked_clients: usize,
    pub burst: u32,
    pub requests_per_second: f64,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub client_key: ClientKeySource,
}

/// GET /api/v1/limiter
pub async fn get_limiter_status(
    State(state): State<AppState>,
) -> Json<ApiResponse<LimiterStatus>> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let policy = state.registry.policy();
    let rate_limit = &state.config.rate_limit;
    let status = LimiterStatus {
        enabled: rate_limit.enabled,
        tracked_clients: state.registry.len(),
        burst: policy.capacity(),
        requests_per_second: policy.refill_rate(),
        idle_timeout_secs: rate_limit.idle_timeout_secs,
        sweep_interval_secs: rate_limit.sweep_interval_secs,
        client_key: rate_limit.client_key,
    };

    let elapsed = start.elapsed().as_millis() as u64;
    Json(ApiResponse::success(status, request_id, elapsed).with_link("self", "/api/v1/limiter"))
}
