use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

use super::dto::QueryResponse;
use super::GatewayState;

const BEARER_PREFIX: &str = "Bearer ";

/// Rejects requests without the configured bearer token. Without a configured token
/// every request passes.
pub(crate) async fn require_bearer(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX));

    if provided == Some(expected) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "rejected unauthenticated request");
        (
            StatusCode::UNAUTHORIZED,
            Json(QueryResponse::error("unauthorized")),
        )
            .into_response()
    }
}
