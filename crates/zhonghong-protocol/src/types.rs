//! Common types used in the protocol.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::*;

/// Identity of one terminal unit behind the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// System (gateway bus) number.
    pub system: u8,
    /// Outdoor unit / area number.
    pub area: u8,
    /// Indoor unit number within the area.
    pub address: u8,
}

impl DeviceAddress {
    /// Create a new device address.
    pub const fn new(system: u8, area: u8, address: u8) -> Self {
        DeviceAddress {
            system,
            area,
            address,
        }
    }

    /// Decode the triple as it appears on the wire.
    ///
    /// The all-`0xFF` triple is the broadcast address and yields `None`.
    pub fn from_wire(bytes: [u8; ADDRESS_SIZE]) -> Option<Self> {
        if bytes == [BROADCAST; ADDRESS_SIZE] {
            None
        } else {
            Some(DeviceAddress::new(bytes[0], bytes[1], bytes[2]))
        }
    }

    /// Wire bytes for an optional address (`None` is broadcast).
    pub fn to_wire(address: Option<DeviceAddress>) -> [u8; ADDRESS_SIZE] {
        match address {
            Some(a) => [a.system, a.area, a.address],
            None => [BROADCAST; ADDRESS_SIZE],
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.system, self.area, self.address)
    }
}

impl FromStr for DeviceAddress {
    type Err = ProtocolError;

    /// Parse `system-area-address`, e.g. `1-1-3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(ProtocolError::InvalidData(format!(
                "device address must look like 1-1-3, got {s:?}"
            )));
        }
        let mut bytes = [0u8; ADDRESS_SIZE];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            *slot = part.trim().parse().map_err(|_| {
                ProtocolError::InvalidData(format!("invalid address component {part:?}"))
            })?;
        }
        Ok(DeviceAddress::new(bytes[0], bytes[1], bytes[2]))
    }
}

/// The command a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Status query or status report.
    Status,
    /// Power on/off.
    Power,
    /// Operation mode.
    Mode,
    /// Fan speed.
    FanSpeed,
    /// Target temperature.
    Temperature,
    /// Any code the profile does not know.
    Other(u8),
}

impl CommandKind {
    /// Whether this kind changes a unit's state.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            CommandKind::Power | CommandKind::Mode | CommandKind::FanSpeed | CommandKind::Temperature
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Status => write!(f, "status"),
            CommandKind::Power => write!(f, "power"),
            CommandKind::Mode => write!(f, "mode"),
            CommandKind::FanSpeed => write!(f, "fan_speed"),
            CommandKind::Temperature => write!(f, "temperature"),
            CommandKind::Other(code) => write!(f, "other(0x{:02X})", code),
        }
    }
}

/// Operation mode of a terminal unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Cool,
    Heat,
    Fan,
    Dry,
    Auto,
}

impl Mode {
    /// All modes, in display order.
    pub const ALL: [Mode; 5] = [Mode::Cool, Mode::Heat, Mode::Fan, Mode::Dry, Mode::Auto];

    /// Wire value byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Mode::Cool => MODE_COOL,
            Mode::Heat => MODE_HEAT,
            Mode::Fan => MODE_FAN,
            Mode::Dry => MODE_DRY,
            Mode::Auto => MODE_AUTO,
        }
    }

    /// Decode a wire value byte.
    pub fn from_byte(value: u8) -> ProtocolResult<Self> {
        match value {
            MODE_COOL => Ok(Mode::Cool),
            MODE_HEAT => Ok(Mode::Heat),
            MODE_FAN => Ok(Mode::Fan),
            MODE_DRY => Ok(Mode::Dry),
            MODE_AUTO => Ok(Mode::Auto),
            _ => Err(ProtocolError::UnknownValue {
                field: "mode",
                value,
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Cool => "cool",
            Mode::Heat => "heat",
            Mode::Fan => "fan",
            Mode::Dry => "dry",
            Mode::Auto => "auto",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::InvalidData(format!("unknown mode {s:?}")))
    }
}

/// Fan speed of a terminal unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanSpeed {
    Low,
    Mid,
    High,
    Auto,
}

impl FanSpeed {
    /// All fan speeds, in display order.
    pub const ALL: [FanSpeed; 4] = [FanSpeed::Low, FanSpeed::Mid, FanSpeed::High, FanSpeed::Auto];

    /// Wire value byte.
    pub fn to_byte(self) -> u8 {
        match self {
            FanSpeed::Low => FAN_LOW,
            FanSpeed::Mid => FAN_MID,
            FanSpeed::High => FAN_HIGH,
            FanSpeed::Auto => FAN_AUTO,
        }
    }

    /// Decode a wire value byte. The vendor's intermediate steps map to `Mid`.
    pub fn from_byte(value: u8) -> ProtocolResult<Self> {
        match value {
            FAN_LOW => Ok(FanSpeed::Low),
            FAN_MID | FAN_MID_HIGH | FAN_MID_LOW => Ok(FanSpeed::Mid),
            FAN_HIGH => Ok(FanSpeed::High),
            FAN_AUTO => Ok(FanSpeed::Auto),
            _ => Err(ProtocolError::UnknownValue {
                field: "fan speed",
                value,
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FanSpeed::Low => "low",
            FanSpeed::Mid => "mid",
            FanSpeed::High => "high",
            FanSpeed::Auto => "auto",
        }
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanSpeed {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FanSpeed::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::InvalidData(format!("unknown fan speed {s:?}")))
    }
}

/// Deployment-specific byte values of the wire protocol.
///
/// The frame shape is fixed; the values below are what a particular gateway
/// firmware expects. Defaults match the stock ZhongHong gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireProfile {
    /// Start-of-frame byte.
    pub preamble: u8,
    /// Code for status queries and reports.
    pub status_code: u8,
    /// Code for power control.
    pub power_code: u8,
    /// Code for mode control.
    pub mode_code: u8,
    /// Code for fan speed control.
    pub fan_speed_code: u8,
    /// Code for temperature control.
    pub temperature_code: u8,
    /// Encoded steps per degree Celsius (1 = whole degrees, 2 = half degrees).
    pub temperature_scale: u8,
}

impl Default for WireProfile {
    fn default() -> Self {
        WireProfile {
            preamble: DEFAULT_PREAMBLE,
            status_code: CODE_STATUS,
            power_code: CODE_POWER,
            mode_code: CODE_MODE,
            fan_speed_code: CODE_FAN_SPEED,
            temperature_code: CODE_TEMPERATURE,
            temperature_scale: DEFAULT_TEMPERATURE_SCALE,
        }
    }
}

impl WireProfile {
    /// Wire code for a command kind.
    pub fn code_of(&self, kind: CommandKind) -> u8 {
        match kind {
            CommandKind::Status => self.status_code,
            CommandKind::Power => self.power_code,
            CommandKind::Mode => self.mode_code,
            CommandKind::FanSpeed => self.fan_speed_code,
            CommandKind::Temperature => self.temperature_code,
            CommandKind::Other(code) => code,
        }
    }

    /// Command kind for a wire code.
    pub fn kind_of(&self, code: u8) -> CommandKind {
        if code == self.status_code {
            CommandKind::Status
        } else if code == self.power_code {
            CommandKind::Power
        } else if code == self.mode_code {
            CommandKind::Mode
        } else if code == self.fan_speed_code {
            CommandKind::FanSpeed
        } else if code == self.temperature_code {
            CommandKind::Temperature
        } else {
            CommandKind::Other(code)
        }
    }

    /// Encode a temperature in degrees Celsius.
    pub fn encode_temperature(&self, celsius: f32) -> ProtocolResult<u8> {
        let scale = f32::from(self.temperature_scale.max(1));
        let steps = (celsius * scale).round();
        if !steps.is_finite() || !(0.0..=f32::from(u8::MAX)).contains(&steps) {
            return Err(ProtocolError::InvalidData(format!(
                "temperature {celsius} out of range"
            )));
        }
        Ok(steps as u8)
    }

    /// Decode a temperature byte into degrees Celsius.
    pub fn decode_temperature(&self, value: u8) -> f32 {
        f32::from(value) / f32::from(self.temperature_scale.max(1))
    }
}
