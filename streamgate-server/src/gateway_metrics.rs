use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub(crate) struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub(crate) const COUNTERS: [Metric; 4] = [
    GATEWAY_REQUESTS_TOTAL,
    LOG_MESSAGES_IN_TOTAL,
    LOG_BYTES_IN_TOTAL,
    SUBSCRIPTION_MESSAGES_OUT_TOTAL,
];
pub(crate) const GAUGES: [Metric; 1] = [ACTIVE_SUBSCRIPTIONS];
pub(crate) const HISTOGRAMS: [Metric; 1] = [RANGE_READ_ENTRIES];

// GATEWAY Metrics --------------------------

pub(crate) const GATEWAY_REQUESTS_TOTAL: Metric = Metric {
    name: "streamgate_requests_total",
    description: "Total operations handled by the gateway, by operation and result",
};

// LOG Metrics --------------------------

pub(crate) const LOG_MESSAGES_IN_TOTAL: Metric = Metric {
    name: "streamgate_log_messages_in_total",
    description: "Total messages published through the gateway (msg)",
};

pub(crate) const LOG_BYTES_IN_TOTAL: Metric = Metric {
    name: "streamgate_log_bytes_in_total",
    description: "Total payload bytes published through the gateway (bytes)",
};

pub(crate) const RANGE_READ_ENTRIES: Metric = Metric {
    name: "streamgate_range_read_entries",
    description: "Distribution of the number of entries returned by range reads",
};

// SUBSCRIPTION Metrics --------------------------

pub(crate) const SUBSCRIPTION_MESSAGES_OUT_TOTAL: Metric = Metric {
    name: "streamgate_subscription_messages_out_total",
    description: "Total entries delivered to live subscriptions (msg)",
};

pub(crate) const ACTIVE_SUBSCRIPTIONS: Metric = Metric {
    name: "streamgate_active_subscriptions",
    description: "Number of live subscriptions currently holding an engine consumer",
};

pub(crate) fn init_metrics(prom_addr: Option<std::net::SocketAddr>) -> Result<()> {
    info!("initializing metrics exporter");

    if let Some(addr) = prom_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus recorder")?;
        info!(addr = %addr, "prometheus exporter listening");
    }

    for name in COUNTERS {
        register_counter(name)
    }
    for name in GAUGES {
        register_gauge(name)
    }
    for name in HISTOGRAMS {
        register_histogram(name)
    }
    Ok(())
}

/// Registers a counter with the given name.
fn register_counter(metric: Metric) {
    metrics::describe_counter!(metric.name, metric.description);
    let _counter = metrics::counter!(metric.name);
}

/// Registers a gauge with the given name.
fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}

/// Registers a histogram with the given name.
fn register_histogram(metric: Metric) {
    metrics::describe_histogram!(metric.name, metric.description);
    let _histogram = metrics::histogram!(metric.name);
}
