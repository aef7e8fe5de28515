mod auth;
mod dto;
mod health_handler;
mod playground;
mod query_handler;
mod subscribe_handler;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::mediation_service::MediationService;
use crate::publish_gate::MAX_PAYLOAD_BYTES;

use auth::require_bearer;
use health_handler::{healthz, readyz};
use playground::playground;
use query_handler::query_handler;
use subscribe_handler::subscribe_handler;

/// Shared state handed to every handler.
pub(crate) struct GatewayState {
    pub(crate) service: MediationService,
    /// Bearer token required on `/query` and `/subscribe`, if any
    pub(crate) auth_token: Option<String>,
    /// Interval between keep-alive comments on idle subscription streams
    pub(crate) keep_alive: Duration,
    /// Cancelled when the server starts shutting down
    pub(crate) shutdown: CancellationToken,
}

pub(crate) fn router(state: Arc<GatewayState>) -> Router {
    let protected = Router::new()
        .route("/query", post(query_handler))
        .route("/subscribe", get(subscribe_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_bearer,
        ));

    Router::new()
        .route("/", get(playground))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(protected)
        // JSON-escaped payloads can be larger than the raw payload limit
        .layer(DefaultBodyLimit::max(4 * MAX_PAYLOAD_BYTES))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub(crate) async fn serve(addr: SocketAddr, state: Arc<GatewayState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", addr))?;

    info!("listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("gateway server failed")?;

    info!("gateway shut down gracefully");
    Ok(())
}

/// Waits for SIGTERM or SIGINT, then cancels `shutdown` so long-lived streams end.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
    shutdown.cancel();
}

#[cfg(test)]
#[path = "http_server_test.rs"]
mod http_server_test;
