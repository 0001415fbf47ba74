//! Settings snapshot endpoint.
//!
//! `GET /settings` sits behind the initialization gate and shows what the
//! initialization action configured. Signing keys are reported only as
//! `sign_key_set` flags.

use axum::extract::State;
use tracing::instrument;

use crate::models::{ApiResponse, SettingsResponse};
use crate::state::AppState;

/// Current settings of the signing validator and every proxy client.
#[instrument(skip(state))]
pub async fn settings(State(state): State<AppState>) -> ApiResponse<SettingsResponse> {
    let middlewares = state.gate.middlewares();
    let sign = middlewares.sign();
    let proxy = middlewares.proxy();

    ApiResponse::ok(SettingsResponse::collect(sign.as_deref(), proxy.as_deref()))
}
