use axum::{extract::State, http::StatusCode};
use std::sync::Arc;

use super::GatewayState;

/// Liveness: the process is up and serving.
pub(crate) async fn healthz() -> &'static str {
    "ok"
}

/// Readiness: fails while the engine connection is down.
pub(crate) async fn readyz(State(state): State<Arc<GatewayState>>) -> (StatusCode, &'static str) {
    if state.service.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "engine disconnected")
    }
}
