//! Gateway client configuration.
//!
//! Configuration is usually loaded from YAML:
//!
//! ```yaml
//! host: 192.168.1.50
//! port: 9999
//! connect_timeout_ms: 5000
//! command_timeout_ms: 3000
//! backoff:
//!   min_delay_ms: 500
//!   max_delay_ms: 30000
//!   max_retries: 20
//! keepalive:
//!   idle_secs: 1
//!   interval_secs: 3
//!   retries: 5
//! profile:
//!   preamble: 170
//! ```
//!
//! Every field except `host` has a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zhonghong_protocol::WireProfile;

use crate::error::{GatewayError, GatewayResult};

/// Default gateway TCP port.
pub const DEFAULT_PORT: u16 = 9999;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_command_timeout_ms() -> u64 {
    3_000
}

fn default_read_buffer_size() -> usize {
    1024
}

/// Reconnect backoff bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay after a link loss, in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound of the doubling delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Give up after this many failed attempts; retry forever when unset.
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            min_delay_ms: 500,
            max_delay_ms: 30_000,
            max_retries: None,
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.min_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// TCP keepalive probing of the gateway socket.
///
/// A gateway that loses power never closes its end; keepalive probes are what
/// turn that into a read error and a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    /// Idle time before the first probe, in seconds.
    pub idle_secs: u64,
    /// Time between unanswered probes, in seconds.
    pub interval_secs: u64,
    /// Unanswered probes before the link is considered dead.
    pub retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        KeepaliveConfig {
            enabled: true,
            idle_secs: 1,
            interval_secs: 3,
            retries: 5,
        }
    }
}

impl KeepaliveConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Everything the client needs to reach and talk to one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host name or IP address.
    pub host: String,
    /// Gateway TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Socket connect timeout, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-command reply timeout, in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Reconnect backoff.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// TCP keepalive.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    /// Size of the socket read buffer.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Byte values of the deployed gateway firmware.
    #[serde(default)]
    pub profile: WireProfile,
}

impl GatewayConfig {
    /// Create a configuration with defaults for everything but the endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        GatewayConfig {
            host: host.into(),
            port,
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            backoff: BackoffConfig::default(),
            keepalive: KeepaliveConfig::default(),
            read_buffer_size: default_read_buffer_size(),
            profile: WireProfile::default(),
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> GatewayResult<Self> {
        let config: GatewayConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values the client cannot work with.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.host.trim().is_empty() {
            return Err(GatewayError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(GatewayError::Config("port must not be 0".into()));
        }
        if self.connect_timeout_ms == 0 || self.command_timeout_ms == 0 {
            return Err(GatewayError::Config("timeouts must be greater than zero".into()));
        }
        if self.backoff.min_delay_ms == 0 || self.backoff.min_delay_ms > self.backoff.max_delay_ms {
            return Err(GatewayError::Config(format!(
                "invalid backoff bounds: min {} ms, max {} ms",
                self.backoff.min_delay_ms, self.backoff.max_delay_ms
            )));
        }
        if self.keepalive.enabled
            && (self.keepalive.idle_secs == 0
                || self.keepalive.interval_secs == 0
                || self.keepalive.retries == 0)
        {
            return Err(GatewayError::Config(
                "keepalive idle, interval and retries must be greater than zero".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(GatewayError::Config("read_buffer_size must not be 0".into()));
        }
        Ok(())
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
