//! Error types for the gateway client.

use std::io;
use std::time::Duration;

use thiserror::Error;
use zhonghong_protocol::{DeviceAddress, ProtocolError};

/// Errors surfaced by the gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No matching reply arrived before the command's deadline.
    #[error("no reply from gateway within {0:?}")]
    Timeout(Duration),

    /// The link to the gateway is down.
    #[error("connection to gateway lost")]
    ConnectionLost,

    /// The caller cancelled the command.
    #[error("command cancelled")]
    Cancelled,

    /// Opening the socket failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// `host:port` that was dialed.
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The registry has never seen this unit.
    #[error("device {0} not found")]
    NotFound(DeviceAddress),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The client has been closed by its owner.
    #[error("gateway client is closed")]
    Closed,
}

/// Result type alias for gateway client operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
