//! Axum router configuration with middleware.
//!
//! API routes live under `/api/v1/`; `/health` sits at the root.
//! Middleware (outermost first): tracing, panic recovery, admission control,
//! CORS, request timeout. Admission control therefore sees every request,
//! including health checks, CORS preflights, and unknown paths.

use std::any::Any;

use axum::http::{StatusCode, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::http::admission::admission_control;
use crate::http::error::AppError;
use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new().route("/limiter", get(handlers::limiter::get_limiter_status));

    let routes = Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .fallback(not_found);

    with_middleware(routes, state)
}

/// Wrap `routes` in the service's middleware stack and attach state.
fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods(cors::Any)
        .allow_headers(cors::Any);

    let mut router = routes
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.server.request_timeout(),
        ))
        .layer(cors_layer);

    // CorsLayer answers preflights itself, so admission must sit outside it.
    if state.config.rate_limit.enabled {
        router = router.layer(middleware::from_fn_with_state(
            state.clone(),
            admission_control,
        ));
    } else {
        tracing::warn!("rate limiting disabled; every request will be admitted");
    }

    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint (no auth required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    tracing::error!(panic = detail, "handler panicked");
    AppError::Internal("Internal server error".to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{header, Method, Request};
    use chatgate_core::limiter::{BucketPolicy, LimiterRegistry, ManualClock};
    use chatgate_types::config::{ClientKeySource, ServiceConfig};
    use tower::ServiceExt;

    use super::*;
    use crate::http::admission::{RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING};

    fn test_state(burst: u32, rate: f64) -> (AppState, ManualClock) {
        let mut config = ServiceConfig::default();
        config.rate_limit.burst = burst;
        config.rate_limit.requests_per_second = rate;
        test_state_with(config)
    }

    fn test_state_with(config: ServiceConfig) -> (AppState, ManualClock) {
        let clock = ManualClock::new();
        let policy = BucketPolicy::from_config(&config.rate_limit).unwrap();
        let registry = LimiterRegistry::with_clock(policy, Arc::new(clock.clone()));
        (AppState::with_registry(config, registry), clock)
    }

    fn request_from(path: &str, peer: &str) -> Request<Body> {
        let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
        let mut req = Request::builder().uri(path).body(Body::empty()).unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    /// Router with a `/probe` route that counts how often it actually runs.
    fn probe_router(state: AppState) -> (Router, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let routes = Router::new().route(
            "/probe",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        (with_middleware(routes, state), hits)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_admitted_with_rate_limit_headers() {
        let (state, _clock) = test_state(10, 5.0);
        let app = build_router(state);

        let response = app.oneshot(request_from("/health", "1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[RATE_LIMIT_LIMIT], "10");
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING], "9");

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn burst_exhaustion_short_circuits_with_429() {
        let (state, _clock) = test_state(10, 5.0);
        let (app, hits) = probe_router(state);

        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(request_from("/probe", "1.2.3.4"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request_from("/probe", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING], "0");
        assert_eq!(hits.load(Ordering::SeqCst), 10);

        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "RATE_LIMITED");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn refill_readmits_after_time_passes() {
        let (state, clock) = test_state(10, 5.0);
        let (app, hits) = probe_router(state);

        for _ in 0..11 {
            let _ = app.clone().oneshot(request_from("/probe", "1.2.3.4")).await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 10);

        clock.advance(Duration::from_secs(1));
        let mut statuses = Vec::new();
        for _ in 0..6 {
            let response = app
                .clone()
                .oneshot(request_from("/probe", "1.2.3.4"))
                .await
                .unwrap();
            statuses.push(response.status());
        }
        assert_eq!(&statuses[..5], &[StatusCode::OK; 5]);
        assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(hits.load(Ordering::SeqCst), 15);
    }

    #[tokio::test]
    async fn distinct_peers_have_independent_buckets() {
        let (state, _clock) = test_state(1, 1.0);
        let (app, _hits) = probe_router(state);

        let a1 = app.clone().oneshot(request_from("/probe", "10.0.0.1")).await.unwrap();
        let a2 = app.clone().oneshot(request_from("/probe", "10.0.0.1")).await.unwrap();
        let b1 = app.clone().oneshot(request_from("/probe", "10.0.0.2")).await.unwrap();

        assert_eq!(a1.status(), StatusCode::OK);
        assert_eq!(a2.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(b1.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forwarded_mode_keys_on_forwarded_for() {
        let mut config = ServiceConfig::default();
        config.rate_limit.burst = 1;
        config.rate_limit.client_key = ClientKeySource::Forwarded;
        let (state, _clock) = test_state_with(config);
        let registry = Arc::clone(&state.registry);
        let (app, _hits) = probe_router(state);

        // Same proxy peer, two different forwarded clients.
        for client in ["203.0.113.1", "203.0.113.2"] {
            let mut req = request_from("/probe", "10.0.0.254");
            req.headers_mut()
                .insert("x-forwarded-for", client.parse().unwrap());
            let response = app.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(&"10.0.0.254".into()));
    }

    #[tokio::test]
    async fn missing_connect_info_uses_unknown_bucket() {
        let (state, _clock) = test_state(1, 1.0);
        let registry = Arc::clone(&state.registry);
        let (app, _hits) = probe_router(state);

        let req = Request::builder().uri("/probe").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(registry.contains(&chatgate_types::limiter::ClientKey::unknown()));
    }

    #[tokio::test]
    async fn disabled_limiter_admits_everything() {
        let mut config = ServiceConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.burst = 1;
        let (state, _clock) = test_state_with(config);
        let registry = Arc::clone(&state.registry);
        let (app, hits) = probe_router(state);

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request_from("/probe", "1.2.3.4"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(RATE_LIMIT_LIMIT).is_none());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn limiter_status_reports_tracked_clients() {
        let (state, _clock) = test_state(10, 5.0);
        let app = build_router(state);

        let _ = app.clone().oneshot(request_from("/health", "10.0.0.1")).await.unwrap();
        let response = app
            .oneshot(request_from("/api/v1/limiter", "10.0.0.2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["data"]["tracked_clients"], 2);
        assert_eq!(body["data"]["burst"], 10);
        assert_eq!(body["data"]["client_key"], "peer");
        assert_eq!(body["_links"]["self"], "/api/v1/limiter");
    }

    #[tokio::test]
    async fn unknown_route_is_rate_limited_then_404() {
        let (state, _clock) = test_state(1, 1.0);
        let app = build_router(state);

        let first = app.clone().oneshot(request_from("/nope", "10.0.0.3")).await.unwrap();
        assert_eq!(first.status(), StatusCode::NOT_FOUND);
        let body = body_json(first).await;
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");

        let second = app.oneshot(request_from("/nope", "10.0.0.3")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        let (state, _clock) = test_state(10, 5.0);
        async fn boom() -> &'static str {
            panic!("handler exploded")
        }
        let routes = Router::new().route("/boom", get(boom));
        let app = with_middleware(routes, state);

        let response = app.oneshot(request_from("/boom", "10.0.0.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "INTERNAL_ERROR");
    }

    fn preflight_from(path: &str, peer: &str) -> Request<Body> {
        let mut req = request_from(path, peer);
        *req.method_mut() = Method::OPTIONS;
        let headers = req.headers_mut();
        headers.insert(header::ORIGIN, "https://chat.example.com".parse().unwrap());
        headers.insert(header::ACCESS_CONTROL_REQUEST_METHOD, "POST".parse().unwrap());
        req
    }

    #[tokio::test]
    async fn cors_preflight_goes_through_admission() {
        let (state, _clock) = test_state(1, 1.0);
        let registry = Arc::clone(&state.registry);
        let app = build_router(state);

        let first = app.clone().oneshot(preflight_from("/health", "1.2.3.4")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert!(first.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        assert_eq!(first.headers()[RATE_LIMIT_REMAINING], "0");

        let second = app.oneshot(preflight_from("/health", "1.2.3.4")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[header::RETRY_AFTER], "1");
        let body = body_json(second).await;
        assert_eq!(body["errors"][0]["code"], "RATE_LIMITED");

        assert!(registry.contains(&"1.2.3.4".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out_with_408() {
        let mut config = ServiceConfig::default();
        config.server.request_timeout_secs = 1;
        let (state, _clock) = test_state_with(config);
        async fn stall() -> &'static str {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "late"
        }
        let app = with_middleware(Router::new().route("/stall", get(stall)), state);

        let response = app.oneshot(request_from("/stall", "10.0.0.5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
