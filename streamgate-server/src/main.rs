mod args_parse;
mod error;
mod gateway_metrics;
mod http_server;
mod kv_bridge;
mod mediation_service;
mod publish_gate;
mod range_query;
mod service_configuration;
mod subscription;

use std::{fs::read_to_string, path::Path, sync::Arc};

use crate::{
    args_parse::Args,
    gateway_metrics::init_metrics,
    http_server::GatewayState,
    mediation_service::MediationService,
    service_configuration::{LoadConfiguration, ServiceConfiguration},
};

use anyhow::{Context, Result};
use clap::Parser;
use streamgate_core::Engine;
use streamgate_engine::EngineStorage;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Load the configuration from the specified YAML file, or fall back to the defaults
    let load_config: LoadConfiguration = match &args.config_file {
        Some(config_file) => {
            let config_content = read_to_string(Path::new(config_file))
                .with_context(|| format!("Failed to read config file {}", config_file))?;
            serde_yaml::from_str(&config_content)
                .with_context(|| format!("Failed to parse config file {}", config_file))?
        }
        None => LoadConfiguration::default(),
    };

    // Attempt to transform LoadConfiguration into ServiceConfiguration
    let mut service_config: ServiceConfiguration = load_config.try_into()?;
    service_config.apply_args(&args)?;

    // Init metrics with or without prometheus exporter
    init_metrics(service_config.prom_exporter)?;

    let engine: Arc<dyn Engine> = Arc::new(
        EngineStorage::connect(&service_config.engine)
            .await
            .context("Failed to connect to the engine")?,
    );

    let service = MediationService::new(engine, service_config.subscriptions.settings());
    let state = Arc::new(GatewayState {
        service,
        auth_token: service_config.auth_token.clone(),
        keep_alive: service_config.subscriptions.keep_alive(),
        shutdown: CancellationToken::new(),
    });

    if state.auth_token.is_some() {
        info!("bearer token authentication enabled");
    }

    http_server::serve(service_config.listen_addr, state).await
}
