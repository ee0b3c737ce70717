//! Commands that can be sent to a terminal unit through the gateway.

use std::fmt;

use crate::constants::*;
use crate::error::*;
use crate::types::*;

/// Commands sent to the gateway (host → gateway).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Switch the unit on (`true`) or off.
    SetPower(bool),
    /// Change the operation mode.
    SetMode(Mode),
    /// Change the fan speed.
    SetFanSpeed(FanSpeed),
    /// Change the target temperature in degrees Celsius.
    SetTemperature(f32),
    /// Ask for the unit's current status.
    Query,
}

impl Command {
    /// The command kind, which is also the kind of the expected reply.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetPower(_) => CommandKind::Power,
            Command::SetMode(_) => CommandKind::Mode,
            Command::SetFanSpeed(_) => CommandKind::FanSpeed,
            Command::SetTemperature(_) => CommandKind::Temperature,
            Command::Query => CommandKind::Status,
        }
    }

    /// Encode the payload bytes that follow the command code.
    pub fn payload(&self, profile: &WireProfile) -> ProtocolResult<Vec<u8>> {
        let payload = match self {
            Command::SetPower(on) => vec![if *on { POWER_ON } else { POWER_OFF }],
            Command::SetMode(mode) => vec![mode.to_byte()],
            Command::SetFanSpeed(speed) => vec![speed.to_byte()],
            Command::SetTemperature(celsius) => vec![profile.encode_temperature(*celsius)?],
            Command::Query => Vec::new(),
        };
        Ok(payload)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetPower(on) => write!(f, "power {}", if *on { "on" } else { "off" }),
            Command::SetMode(mode) => write!(f, "mode {}", mode),
            Command::SetFanSpeed(speed) => write!(f, "fan {}", speed),
            Command::SetTemperature(celsius) => write!(f, "temperature {:.1}", celsius),
            Command::Query => write!(f, "query"),
        }
    }
}
