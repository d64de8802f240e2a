//! Per-client admission control middleware.
//!
//! Runs in front of every route. Derives a client key from the request,
//! asks the registry to admit it, and either forwards the request or
//! answers 429 without touching anything downstream.
//!
//! Key derivation is explicit (see [`ClientKeySource`]):
//! - `peer`: the TCP peer IP. Behind a reverse proxy every client shares the
//!   proxy's address, so use `forwarded` there.
//! - `forwarded`: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
//!   Clients can forge these headers when no proxy rewrites them.
//!
//! Requests with no usable address share the `unknown` bucket.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use chatgate_types::config::ClientKeySource;
use chatgate_types::limiter::{Admission, ClientKey};

use crate::http::error::AppError;
use crate::state::AppState;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Axum middleware: admit or reject the request for its client key.
pub async fn admission_control(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let key = client_key(state.config.rate_limit.client_key, req.headers(), peer);

    let admission = state.registry.admit(&key);

    let mut response = if admission.allowed {
        next.run(req).await
    } else {
        let retry_after_secs = admission.retry_after_secs().unwrap_or(1);
        tracing::warn!(client = %key, retry_after_secs, "rate limit exceeded");
        AppError::RateLimited { retry_after_secs }.into_response()
    };

    insert_rate_limit_headers(response.headers_mut(), &admission);
    response
}

/// Derive the rate-limit key for a request.
pub fn client_key(source: ClientKeySource, headers: &HeaderMap, peer: Option<IpAddr>) -> ClientKey {
    let forwarded = match source {
        ClientKeySource::Peer => None,
        ClientKeySource::Forwarded => forwarded_ip(headers),
    };

    forwarded
        .or(peer)
        .map(ClientKey::from)
        .unwrap_or_else(ClientKey::unknown)
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let first_hop = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    first_hop.or_else(|| {
        headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    })
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, admission: &Admission) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(admission.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(admission.remaining));
}
