//! Async client for ZhongHong HVAC gateways.
//!
//! A [`Gateway`] keeps one TCP connection to the gateway. A background
//! dispatcher reads every frame the gateway sends; replies to the command in
//! flight go back to its caller and everything else updates the
//! [`DeviceRegistry`], which notifies subscribers when a unit's state changes.
//!
//! Lost links are re-established with exponential backoff. A command issued
//! while the link is down fails with [`GatewayError::ConnectionLost`].

mod client;
mod config;
mod correlator;
mod diagnostics;
mod dispatcher;
mod error;
mod registry;
mod session;

pub use client::Gateway;
pub use config::{BackoffConfig, GatewayConfig, KeepaliveConfig, DEFAULT_PORT};
pub use correlator::{Correlator, PendingCommand};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use dispatcher::Dispatcher;
pub use error::{GatewayError, GatewayResult};
pub use registry::{DeviceRegistry, DeviceState, Observer, SubscriptionId};
pub use session::{LinkState, Session};

pub use zhonghong_protocol as protocol;
