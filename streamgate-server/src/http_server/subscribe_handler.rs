use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use streamgate_core::SubscribeRequest;
use tracing::{debug, Level};

use super::dto::LogEntryDto;
use super::query_handler::bad_request;
use super::GatewayState;
use crate::error::ErrorMessage;

#[derive(Debug, Deserialize)]
pub(crate) struct SubscribeParams {
    log: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    resume: Option<u64>,
}

/// `GET /subscribe`: server-sent events carrying one `entry` event per delivered log
/// entry, or a single `error` event before the stream ends.
#[tracing::instrument(level = Level::INFO, skip_all)]
pub(crate) async fn subscribe_handler(
    State(state): State<Arc<GatewayState>>,
    params: Result<Query<SubscribeParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return bad_request(rejection.body_text()).into_response(),
    };

    let request = SubscribeRequest {
        log_name: params.log,
        subject_filter: params.subject.filter(|subject| !subject.is_empty()),
        resume: params.resume,
    };
    let subscription = state.service.subscribe(request).await;
    debug!(state = ?subscription.state(), "subscription opened");

    let events = subscription
        .map(|item| match item {
            Ok(entry) => Event::default()
                .event("entry")
                .id(entry.sequence.to_string())
                .json_data(LogEntryDto::from(entry)),
            Err(err) => Event::default()
                .event("error")
                .json_data(ErrorMessage::from(&err)),
        })
        // Open streams must not hold up a graceful shutdown
        .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.keep_alive))
        .into_response()
}
