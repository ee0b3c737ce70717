//! Metrics infrastructure for the ZhongHong gateway client.
//!
//! Declares every metric the client emits as a [`Metric`] constant and
//! re-exports the `metrics` crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use zhonghong_metrics::{describe_metrics, metric_defs, GatewayLabels};
//!
//! describe_metrics();
//!
//! let labels = GatewayLabels::new("192.168.1.50:9999");
//! metrics::counter!(metric_defs::FRAMES_DECODED.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{KeyName, SharedString, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric name with the metadata handed to the recorder.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind, description: &'static str) -> Self {
        Metric {
            name,
            kind,
            description,
            unit: None,
        }
    }

    const fn in_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Register the description with the installed recorder, if any.
    pub fn describe(&self) {
        let key = KeyName::from_const_str(self.name);
        let description = SharedString::from(self.description);
        metrics::with_recorder(|recorder| match self.kind {
            MetricKind::Counter => recorder.describe_counter(key, self.unit, description),
            MetricKind::Gauge => recorder.describe_gauge(key, self.unit, description),
            MetricKind::Histogram => recorder.describe_histogram(key, self.unit, description),
        });
    }
}

/// All metric definitions for the gateway client.
///
/// Every metric carries a `gateway` label; those noted below also carry
/// `command`.
pub mod metric_defs {
    use super::Metric;
    use super::MetricKind::{Counter, Gauge, Histogram};
    use metrics::Unit;

    // ========================================================================
    // Frame Layer
    // ========================================================================

    /// Labels: gateway, command
    pub const FRAMES_DECODED: Metric = Metric::new(
        "zhonghong.frames.decoded",
        Counter,
        "Frames decoded with a valid checksum",
    )
    .in_unit(Unit::Count);

    pub const FRAMES_CHECKSUM_ERRORS: Metric = Metric::new(
        "zhonghong.frames.checksum_errors",
        Counter,
        "Frame candidates discarded on a bad length or checksum",
    )
    .in_unit(Unit::Count);

    pub const FRAMES_PARSE_ERRORS: Metric = Metric::new(
        "zhonghong.frames.parse_errors",
        Counter,
        "Device update frames with a malformed payload",
    )
    .in_unit(Unit::Count);

    /// Labels: gateway, command
    pub const FRAMES_DROPPED: Metric = Metric::new(
        "zhonghong.frames.dropped",
        Counter,
        "Frames matching no pending command and no device update",
    )
    .in_unit(Unit::Count);

    // ========================================================================
    // Commands
    // ========================================================================

    /// Labels: gateway, command
    pub const COMMANDS_SENT: Metric = Metric::new(
        "zhonghong.commands.sent",
        Counter,
        "Commands written to the gateway",
    )
    .in_unit(Unit::Count);

    /// Labels: gateway, command
    pub const COMMANDS_TIMEOUTS: Metric = Metric::new(
        "zhonghong.commands.timeouts",
        Counter,
        "Commands without a reply before their deadline",
    )
    .in_unit(Unit::Count);

    pub const COMMANDS_CONNECTION_LOST: Metric = Metric::new(
        "zhonghong.commands.connection_lost",
        Counter,
        "Commands failed because the gateway link was lost",
    )
    .in_unit(Unit::Count);

    /// Labels: gateway, command
    pub const COMMAND_LATENCY: Metric = Metric::new(
        "zhonghong.commands.latency_ms",
        Histogram,
        "Time from command write to matching reply",
    )
    .in_unit(Unit::Milliseconds);

    // ========================================================================
    // Link
    // ========================================================================

    pub const LINK_RECONNECTS: Metric = Metric::new(
        "zhonghong.link.reconnects",
        Counter,
        "Successful reconnects after a link loss",
    )
    .in_unit(Unit::Count);

    /// 1 while the gateway socket is connected, 0 otherwise.
    pub const LINK_CONNECTED: Metric = Metric::new(
        "zhonghong.link.connected",
        Gauge,
        "Whether the gateway socket is connected",
    );

    // ========================================================================
    // Registry
    // ========================================================================

    pub const REGISTRY_CHANGES: Metric = Metric::new(
        "zhonghong.registry.changes",
        Counter,
        "Registry updates that changed observable state",
    )
    .in_unit(Unit::Count);

    pub const REGISTRY_DEVICES: Metric = Metric::new(
        "zhonghong.registry.devices",
        Gauge,
        "Number of terminal units known to the registry",
    )
    .in_unit(Unit::Count);

    pub const OBSERVER_FAILURES: Metric = Metric::new(
        "zhonghong.registry.observer_failures",
        Counter,
        "Observer callbacks that panicked",
    )
    .in_unit(Unit::Count);

    pub const ALL: &[&Metric] = &[
        &FRAMES_DECODED,
        &FRAMES_CHECKSUM_ERRORS,
        &FRAMES_PARSE_ERRORS,
        &FRAMES_DROPPED,
        &COMMANDS_SENT,
        &COMMANDS_TIMEOUTS,
        &COMMANDS_CONNECTION_LOST,
        &COMMAND_LATENCY,
        &LINK_RECONNECTS,
        &LINK_CONNECTED,
        &REGISTRY_CHANGES,
        &REGISTRY_DEVICES,
        &OBSERVER_FAILURES,
    ];
}

/// Labels identifying which gateway a metric belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayLabels {
    /// Gateway endpoint, `host:port`.
    pub gateway: String,
}

impl GatewayLabels {
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
        }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("gateway", self.gateway.clone())]
    }

    /// Returns labels with additional key-value pairs.
    ///
    /// ```rust
    /// use zhonghong_metrics::GatewayLabels;
    ///
    /// let labels = GatewayLabels::new("10.0.0.2:9999").with(&[("command", "power".to_string())]);
    /// assert!(labels.iter().any(|(k, v)| *k == "command" && v == "power"));
    /// ```
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all metrics with the installed recorder.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus recorder serving `/metrics` on `addr` and describe
/// every metric.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
