//! Client-side counters.
//!
//! Each event is counted twice: in a local atomic, readable through
//! [`Diagnostics::snapshot`], and through the `metrics` facade so an
//! installed recorder (e.g. the Prometheus exporter) sees it too.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use zhonghong_metrics::metric_defs::*;
use zhonghong_metrics::metrics::{counter, gauge, histogram};
use zhonghong_metrics::GatewayLabels;
use zhonghong_protocol::CommandKind;

/// Point-in-time copy of the client's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub frames_decoded: u64,
    pub checksum_errors: u64,
    pub parse_errors: u64,
    pub dropped_frames: u64,
    pub commands_sent: u64,
    pub timeouts: u64,
    pub connection_lost: u64,
    pub reconnects: u64,
    pub observer_failures: u64,
}

/// Live counters shared by the session, dispatcher, correlator and registry.
#[derive(Debug)]
pub struct Diagnostics {
    labels: GatewayLabels,
    frames_decoded: AtomicU64,
    checksum_errors: AtomicU64,
    parse_errors: AtomicU64,
    dropped_frames: AtomicU64,
    commands_sent: AtomicU64,
    timeouts: AtomicU64,
    connection_lost: AtomicU64,
    reconnects: AtomicU64,
    observer_failures: AtomicU64,
}

impl Diagnostics {
    pub fn new(labels: GatewayLabels) -> Self {
        Diagnostics {
            labels,
            frames_decoded: AtomicU64::new(0),
            checksum_errors: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            connection_lost: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            observer_failures: AtomicU64::new(0),
        }
    }

    pub fn labels(&self) -> &GatewayLabels {
        &self.labels
    }

    fn command_labels(&self, command: CommandKind) -> Vec<(&'static str, String)> {
        self.labels.with(&[("command", command.to_string())])
    }

    pub fn record_frame_decoded(&self, command: CommandKind) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        counter!(FRAMES_DECODED.name, self.command_labels(command).as_slice()).increment(1);
    }

    pub fn record_checksum_error(&self) {
        self.checksum_errors.fetch_add(1, Ordering::Relaxed);
        counter!(FRAMES_CHECKSUM_ERRORS.name, self.labels.to_labels().as_slice()).increment(1);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        counter!(FRAMES_PARSE_ERRORS.name, self.labels.to_labels().as_slice()).increment(1);
    }

    pub fn record_dropped(&self, command: CommandKind) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        counter!(FRAMES_DROPPED.name, self.command_labels(command).as_slice()).increment(1);
    }

    pub fn record_command_sent(&self, command: CommandKind) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        counter!(COMMANDS_SENT.name, self.command_labels(command).as_slice()).increment(1);
    }

    pub fn record_timeout(&self, command: CommandKind) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        counter!(COMMANDS_TIMEOUTS.name, self.command_labels(command).as_slice()).increment(1);
    }

    pub fn record_connection_lost(&self) {
        self.connection_lost.fetch_add(1, Ordering::Relaxed);
        counter!(COMMANDS_CONNECTION_LOST.name, self.labels.to_labels().as_slice()).increment(1);
    }

    pub fn record_latency(&self, command: CommandKind, elapsed: Duration) {
        histogram!(COMMAND_LATENCY.name, self.command_labels(command).as_slice())
            .record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        counter!(LINK_RECONNECTS.name, self.labels.to_labels().as_slice()).increment(1);
    }

    pub fn record_link_connected(&self, connected: bool) {
        gauge!(LINK_CONNECTED.name, self.labels.to_labels().as_slice()).set(if connected { 1.0 } else { 0.0 });
    }

    pub fn record_registry_change(&self, devices: usize) {
        counter!(REGISTRY_CHANGES.name, self.labels.to_labels().as_slice()).increment(1);
        gauge!(REGISTRY_DEVICES.name, self.labels.to_labels().as_slice()).set(devices as f64);
    }

    pub fn record_observer_failure(&self) {
        self.observer_failures.fetch_add(1, Ordering::Relaxed);
        counter!(OBSERVER_FAILURES.name, self.labels.to_labels().as_slice()).increment(1);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            connection_lost: self.connection_lost.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            observer_failures: self.observer_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics::new(GatewayLabels::new("unknown"))
    }
}
