use clap::{Parser, ValueEnum};

/// Command line arguments; every flag overrides the matching config file value.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "streamgate", version, about = "Typed gateway over a log and key-value engine")]
pub(crate) struct Args {
    /// Path to the YAML config file. Built-in defaults are used without one.
    #[arg(long)]
    pub(crate) config_file: Option<String>,

    /// Address the HTTP gateway listens on, e.g. 0.0.0.0:8080
    #[arg(long)]
    pub(crate) listen_addr: Option<String>,

    /// Port of the HTTP gateway, applied after --listen-addr
    #[arg(long, env = "PORT")]
    pub(crate) port: Option<u16>,

    /// Engine provider to connect to
    #[arg(long, value_enum)]
    pub(crate) engine: Option<EngineKind>,

    /// NATS server URL. Selects the NATS engine unless --engine memory is given.
    #[arg(long, env = "NATS_URL")]
    pub(crate) nats_url: Option<String>,

    /// Bearer token required on /query and /subscribe
    #[arg(long, env = "AUTH_TOKEN")]
    pub(crate) auth_token: Option<String>,

    /// Prometheus exporter http address
    #[arg(long)]
    pub(crate) prom_exporter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum EngineKind {
    Memory,
    Nats,
}
