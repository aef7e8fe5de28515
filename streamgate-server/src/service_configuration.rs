use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use streamgate_engine::EngineConfig;

use crate::args_parse::{Args, EngineKind};
use crate::subscription::SubscriptionSettings;

pub(crate) const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// configuration settings loaded from the config file
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// HTTP gateway configuration
    #[serde(default)]
    pub(crate) gateway: GatewayConfig,
    /// Engine provider and, for the memory engine, its seeded resources
    #[serde(default)]
    pub(crate) engine: EngineConfig,
    /// Authentication configuration
    #[serde(default)]
    pub(crate) auth: AuthConfig,
    /// Live subscription tuning
    #[serde(default)]
    pub(crate) subscriptions: SubscriptionConfig,
}

/// configuration settings of a running gateway, after validation and overrides
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ServiceConfiguration {
    /// HTTP gateway address
    pub(crate) listen_addr: SocketAddr,
    /// Prometheus exporter address
    pub(crate) prom_exporter: Option<SocketAddr>,
    pub(crate) engine: EngineConfig,
    /// Bearer token required on data endpoints, if any
    pub(crate) auth_token: Option<String>,
    pub(crate) subscriptions: SubscriptionConfig,
}

/// HTTP gateway configuration
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GatewayConfig {
    /// Hostname or IP address the gateway binds to
    pub(crate) host: String,
    pub(crate) ports: GatewayPorts,
}

/// Gateway port configuration
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GatewayPorts {
    /// Query and subscription endpoints
    pub(crate) http: u16,
    /// Prometheus metrics exporter port (optional)
    pub(crate) prometheus: Option<u16>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            host: "0.0.0.0".to_string(),
            ports: GatewayPorts {
                http: 8080,
                prometheus: None,
            },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct AuthConfig {
    pub(crate) token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SubscriptionConfig {
    /// Entries buffered per subscription between the engine and the client
    #[serde(default = "default_channel_capacity")]
    pub(crate) channel_capacity: usize,
    /// Seconds between keep-alive comments on idle streams
    #[serde(default = "default_keep_alive_secs")]
    pub(crate) keep_alive_secs: u64,
    /// Grace period for an in-flight delivery once the client is gone
    #[serde(default = "default_drain_grace_ms")]
    pub(crate) drain_grace_ms: u64,
}

fn default_channel_capacity() -> usize {
    16
}

fn default_keep_alive_secs() -> u64 {
    10
}

fn default_drain_grace_ms() -> u64 {
    500
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        SubscriptionConfig {
            channel_capacity: default_channel_capacity(),
            keep_alive_secs: default_keep_alive_secs(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

impl SubscriptionConfig {
    pub(crate) fn settings(&self) -> SubscriptionSettings {
        SubscriptionSettings {
            channel_capacity: self.channel_capacity,
            drain_grace: Duration::from_millis(self.drain_grace_ms),
        }
    }

    pub(crate) fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ServiceConfiguration
impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let listen_addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.ports.http)
            .parse()
            .context("Failed to create listen_addr")?;

        let prom_exporter: Option<SocketAddr> = match config.gateway.ports.prometheus {
            Some(prom_port) => Some(
                format!("{}:{}", config.gateway.host, prom_port)
                    .parse()
                    .context("Failed to create prom_exporter")?,
            ),
            None => None,
        };

        if config.subscriptions.channel_capacity == 0 {
            return Err(anyhow!("subscriptions.channel_capacity must be at least 1"));
        }
        if config.subscriptions.keep_alive_secs == 0 {
            return Err(anyhow!("subscriptions.keep_alive_secs must be at least 1"));
        }

        Ok(ServiceConfiguration {
            listen_addr,
            prom_exporter,
            engine: config.engine,
            auth_token: config.auth.token.filter(|token| !token.is_empty()),
            subscriptions: config.subscriptions,
        })
    }
}

impl ServiceConfiguration {
    /// Apply command line (and environment) overrides on top of the file configuration.
    pub(crate) fn apply_args(&mut self, args: &Args) -> Result<()> {
        // If `listen_addr` is provided via command-line args, override the value from the config file
        if let Some(listen_addr) = &args.listen_addr {
            self.listen_addr = listen_addr.parse().context(format!(
                "Failed to parse into Socket address: {}",
                listen_addr
            ))?;
        }

        if let Some(port) = args.port {
            self.listen_addr.set_port(port);
        }

        // If `prom_exporter` is provided via command-line args, override the value from the config file
        if let Some(prom_exporter) = &args.prom_exporter {
            let prom_address: SocketAddr = prom_exporter.parse().context(format!(
                "Failed to parse into Socket address: {}",
                prom_exporter
            ))?;
            self.prom_exporter = Some(prom_address);
        }

        let nats_url = args.nats_url.as_ref().filter(|url| !url.is_empty());
        match (args.engine, nats_url) {
            (Some(EngineKind::Memory), _) => {
                if !matches!(self.engine, EngineConfig::Memory { .. }) {
                    self.engine = EngineConfig::default();
                }
            }
            (Some(EngineKind::Nats), url) => {
                let url = url
                    .cloned()
                    .or_else(|| match &self.engine {
                        EngineConfig::Nats { url } => Some(url.clone()),
                        EngineConfig::Memory { .. } => None,
                    })
                    .unwrap_or_else(|| DEFAULT_NATS_URL.to_string());
                self.engine = EngineConfig::Nats { url };
            }
            (None, Some(url)) => {
                self.engine = EngineConfig::Nats { url: url.clone() };
            }
            (None, None) => {}
        }

        if let Some(token) = args.auth_token.as_ref().filter(|token| !token.is_empty()) {
            self.auth_token = Some(token.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamgate_engine::{BucketConfig, LogConfig};

    const SAMPLE: &str = r#"
gateway:
  host: "127.0.0.1"
  ports:
    http: 9090
    prometheus: 9091
engine:
  type: memory
  logs:
    - name: ORDERS
      subjects: ["orders.>"]
  buckets:
    - name: config
      history: 5
auth:
  token: "s3cret"
subscriptions:
  channel_capacity: 32
"#;

    #[test]
    fn loads_yaml_configuration() {
        let load: LoadConfiguration = serde_yaml::from_str(SAMPLE).unwrap();
        let config = ServiceConfiguration::try_from(load).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.prom_exporter, Some("127.0.0.1:9091".parse().unwrap()));
        assert_eq!(config.auth_token.as_deref(), Some("s3cret"));
        assert_eq!(config.subscriptions.channel_capacity, 32);
        assert_eq!(config.subscriptions.keep_alive_secs, 10);
        assert_eq!(
            config.engine,
            EngineConfig::Memory {
                logs: vec![LogConfig::new("ORDERS", &["orders.>"])],
                buckets: vec![BucketConfig::new("config").with_history(5)],
            }
        );
    }

    #[test]
    fn defaults_give_a_runnable_memory_gateway() {
        let config = ServiceConfiguration::try_from(LoadConfiguration::default()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert!(config.prom_exporter.is_none());
        assert!(config.auth_token.is_none());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let mut load = LoadConfiguration::default();
        load.subscriptions.channel_capacity = 0;
        assert!(ServiceConfiguration::try_from(load).is_err());
    }

    #[test]
    fn args_override_the_file() {
        let load: LoadConfiguration = serde_yaml::from_str(SAMPLE).unwrap();
        let mut config = ServiceConfiguration::try_from(load).unwrap();

        config
            .apply_args(&Args {
                listen_addr: Some("0.0.0.0:7000".into()),
                port: Some(7001),
                nats_url: Some("nats://broker:4222".into()),
                auth_token: Some("other".into()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:7001".parse().unwrap());
        assert_eq!(
            config.engine,
            EngineConfig::Nats {
                url: "nats://broker:4222".into()
            }
        );
        assert_eq!(config.auth_token.as_deref(), Some("other"));
    }

    #[test]
    fn explicit_memory_engine_wins_over_nats_url() {
        let mut config = ServiceConfiguration::try_from(LoadConfiguration::default()).unwrap();
        config
            .apply_args(&Args {
                engine: Some(EngineKind::Memory),
                nats_url: Some("nats://broker:4222".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.engine, EngineConfig::default());

        config
            .apply_args(&Args {
                engine: Some(EngineKind::Nats),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            config.engine,
            EngineConfig::Nats {
                url: DEFAULT_NATS_URL.into()
            }
        );
    }

    #[test]
    fn bad_listen_addr_is_an_error() {
        let mut config = ServiceConfiguration::try_from(LoadConfiguration::default()).unwrap();
        assert!(config
            .apply_args(&Args {
                listen_addr: Some("not-an-address".into()),
                ..Default::default()
            })
            .is_err());
    }
}
