//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets / propagates X-Request-Id
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Init Gate       │ ← 503 ModuleInitWaiting until APIBox.Init (bypassed for /health, /ready)
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! The gate wraps the fallback as well, so the initialization action can be
//! sent to any path.

use axum::Router;
use axum::http::HeaderName;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::InitGateLayer;
use crate::state::AppState;

/// Header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router with all routes and middleware configured.
///
/// The gate layer shares `state.gate`, so callbacks registered through
/// [`AppState::on_initialized`] fire when a request initializes the router.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;
    let cors = build_cors_layer(&config.cors_allowed_origins);
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let gate_layer = InitGateLayer::from_config(state.gate.clone(), config);
    if state.gate.is_disabled() {
        info!("Initialization gate disabled, API open from start");
    } else {
        info!(
            bypass_paths = ?config.init_bypass_paths,
            default_lang = %config.default_lang,
            "Initialization gate enabled, waiting for APIBox.Init"
        );
    }

    Router::new()
        // Health endpoints (bypass the gate by default)
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // Gated endpoints
        .route("/settings", get(handlers::settings))
        // Middleware (order matters - the last layer runs first)
        .layer(gate_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

/// Build CORS layer from configuration.
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    #[test]
    fn test_build_cors_layer_specific() {
        let origins = vec!["https://example.com".to_string(), "not a header\n".to_string()];
        let _layer = build_cors_layer(&origins);
    }

    #[tokio::test]
    async fn test_waiting_router_serves_health_only() {
        let app = build_router(AppState::new(Config::default()));

        let health = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        assert!(health.headers().contains_key(REQUEST_ID_HEADER));

        let ready = app
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);

        let settings = app
            .oneshot(Request::get("/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(settings.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_init_on_unrouted_path() {
        let state = AppState::new(Config::default());
        let app = build_router(state.clone());

        let response = app
            .oneshot(
                Request::post("/")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("api_action=APIBox.Init"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.gate.is_initialized());
    }
}
