//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with initialization status
//! - `GET /ready` - Kubernetes-compatible readiness probe
//!
//! Both are bypass paths by default, so they answer while the gateway is
//! still waiting for `APIBox.Init`.
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 while waiting, reports `"waiting"`
//! - **Readiness** (`/ready`): Returns 503 until the gate is open

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK with status details in the body.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "initialized": true,
///   "gate_disabled": false,
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let gate = &state.gate;

    Json(HealthResponse {
        status: if gate.is_open() { "healthy" } else { "waiting" }.to_string(),
        initialized: gate.is_initialized(),
        gate_disabled: gate.is_disabled(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK once traffic flows (gate initialized or disabled),
/// 503 Service Unavailable while waiting for initialization.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.gate.is_open() {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
