//! Protocol constants
//!
//! Default byte values and structural sizes of the ZhongHong gateway protocol.
//! Command codes and the preamble can be overridden per deployment through
//! [`WireProfile`](crate::WireProfile).

// ============================================================================
// Frame Layout
// ============================================================================

/// Default start-of-frame byte.
pub const DEFAULT_PREAMBLE: u8 = 0xAA;

/// Bytes before the address triple: preamble + length.
pub const FRAME_PREFIX_SIZE: usize = 2;

/// Size of the `system, area, address` triple.
pub const ADDRESS_SIZE: usize = 3;

/// Smallest possible frame: preamble, length, address, command, checksum.
pub const MIN_FRAME_SIZE: usize = FRAME_PREFIX_SIZE + ADDRESS_SIZE + 1 + 1;

/// Largest payload that still fits the one-byte length field.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - ADDRESS_SIZE;

/// Address byte value meaning "every unit" on the wire.
pub const BROADCAST: u8 = 0xFF;

// ============================================================================
// Command Codes
// ============================================================================

/// Status query / status push.
pub const CODE_STATUS: u8 = 0x50;
/// Switch a unit on or off.
pub const CODE_POWER: u8 = 0x31;
/// Change the target temperature.
pub const CODE_TEMPERATURE: u8 = 0x32;
/// Change the operation mode.
pub const CODE_MODE: u8 = 0x33;
/// Change the fan speed.
pub const CODE_FAN_SPEED: u8 = 0x34;

// ============================================================================
// Value Bytes
// ============================================================================

pub const POWER_OFF: u8 = 0x00;
pub const POWER_ON: u8 = 0x01;

pub const MODE_COOL: u8 = 0x01;
pub const MODE_DRY: u8 = 0x02;
pub const MODE_FAN: u8 = 0x04;
pub const MODE_HEAT: u8 = 0x08;
pub const MODE_AUTO: u8 = 0x10;

pub const FAN_AUTO: u8 = 0x00;
pub const FAN_HIGH: u8 = 0x01;
pub const FAN_MID: u8 = 0x02;
/// Vendor "mid-high" step, reported as [`FanSpeed::Mid`](crate::FanSpeed::Mid).
pub const FAN_MID_HIGH: u8 = 0x03;
pub const FAN_LOW: u8 = 0x04;
/// Vendor "mid-low" step, reported as [`FanSpeed::Mid`](crate::FanSpeed::Mid).
pub const FAN_MID_LOW: u8 = 0x05;

/// Default temperature encoding: half-degree steps.
pub const DEFAULT_TEMPERATURE_SCALE: u8 = 2;

// ============================================================================
// Status Payloads
// ============================================================================

/// Minimum status payload of an addressed frame:
/// power, set point, mode, fan speed, current temperature.
pub const STATUS_MIN_SIZE: usize = 5;

/// Size of one record inside a broadcast status frame:
/// address triple + the five status fields + error code.
pub const STATUS_RECORD_SIZE: usize = ADDRESS_SIZE + STATUS_MIN_SIZE + 1;
