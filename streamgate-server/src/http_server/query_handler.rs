use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::{warn, Level};

use super::dto::{QueryRequest, QueryResponse};
use super::GatewayState;
use crate::error::GatewayError;
use crate::mediation_service::Operation;
use crate::publish_gate::MAX_PAYLOAD_BYTES;

/// `POST /query`: decode one operation, run it, wrap the outcome in the envelope.
///
/// Malformed bodies and unknown operations are a 400; failures of a well-formed
/// operation are reported in the envelope with a 200. A body over the size limit can
/// only carry an oversized payload, so it is reported as `PayloadTooLarge`.
#[tracing::instrument(level = Level::INFO, skip_all)]
pub(crate) async fn query_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> (StatusCode, Json<QueryResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            let err = GatewayError::PayloadTooLarge {
                size: content_length(&headers).unwrap_or(MAX_PAYLOAD_BYTES + 1),
                limit: MAX_PAYLOAD_BYTES,
            };
            warn!(error = %err, "request body over the size limit");
            return (StatusCode::OK, Json(QueryResponse::from(&err)));
        }
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let operation = match Operation::try_from(request) {
        Ok(operation) => operation,
        Err(reason) => return bad_request(reason),
    };

    let name = operation.name();
    match state.service.execute(operation).await {
        Ok(output) => (StatusCode::OK, Json(QueryResponse::data(name, output))),
        Err(err) => (StatusCode::OK, Json(QueryResponse::from(&err))),
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

pub(crate) fn bad_request(reason: impl Into<String>) -> (StatusCode, Json<QueryResponse>) {
    let reason = reason.into();
    warn!(reason = %reason, "rejected malformed request");
    (StatusCode::BAD_REQUEST, Json(QueryResponse::error(reason)))
}
