//! ZhongHong HVAC Gateway Protocol
//!
//! This crate provides types and utilities for talking to a ZhongHong
//! serial-to-network gateway. One gateway bridges many air-conditioning
//! terminal units; every unit is identified by a `system-area-address`
//! triple and all of them share the same byte stream.
//!
//! # Protocol Overview
//!
//! Every message is a checksummed frame:
//!
//! ```text
//! +----------+--------+--------+------+---------+---------+------------+----------+
//! | preamble | length | system | area | address | command | payload... | checksum |
//! +----------+--------+--------+------+---------+---------+------------+----------+
//! ```
//!
//! Messages are either:
//!
//! - **Commands** (host → gateway): a control code (power, mode, fan speed,
//!   temperature) or a status query for one unit or for all of them
//! - **Command replies** (gateway → host): the gateway echoes the control frame
//!   once the unit has accepted it
//! - **Status pushes** (gateway → host): the full state of one or more units,
//!   sent in reply to a query or whenever a unit changes state
//!
//! The exact preamble and command code values are deployment specific and are
//! carried by [`WireProfile`].
//!
//! # Example
//!
//! ```rust
//! use zhonghong_protocol::{decode, encode, Command, Decoded, DeviceAddress, WireProfile};
//!
//! let profile = WireProfile::default();
//! let address = DeviceAddress::new(1, 1, 3);
//! let command = Command::SetTemperature(22.5);
//!
//! let wire = encode(command.kind(), Some(address), &command.payload(&profile)?, &profile)?;
//! let (decoded, consumed) = decode(&wire, &profile);
//! assert_eq!(consumed, wire.len());
//! assert!(matches!(decoded, Decoded::Frame(_)));
//! # Ok::<(), zhonghong_protocol::ProtocolError>(())
//! ```

mod commands;
mod constants;
mod error;
mod frame;
mod responses;
mod types;

pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use responses::*;
pub use types::*;
