//! Device state carried by frames from the gateway.
//!
//! Status payload of an addressed frame:
//!
//! ```text
//! +-------+-----------+------+-----+--------------+------------+---------+
//! | power | set_point | mode | fan | current_temp | error_code | padding |
//! +-------+-----------+------+-----+--------------+------------+---------+
//! ```
//!
//! `error_code` and padding are optional. A broadcast status frame instead
//! carries a sequence of records, each prefixed with the unit's address triple.

use crate::constants::*;
use crate::error::*;
use crate::frame::Frame;
use crate::types::*;

/// Full state of one unit as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    pub address: DeviceAddress,
    pub power: bool,
    pub mode: Mode,
    pub fan_speed: FanSpeed,
    /// Target temperature in degrees Celsius.
    pub set_point: f32,
    /// Room temperature in degrees Celsius.
    pub current_temp: f32,
    /// Unit fault code, 0 when healthy.
    pub error_code: u8,
}

impl StatusReport {
    /// Decode the status fields that follow the address.
    fn decode_fields(
        address: DeviceAddress,
        data: &[u8],
        profile: &WireProfile,
    ) -> ProtocolResult<Self> {
        if data.len() < STATUS_MIN_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: STATUS_MIN_SIZE,
                actual: data.len(),
            });
        }
        Ok(StatusReport {
            address,
            power: data[0] % 2 == POWER_ON,
            set_point: profile.decode_temperature(data[1]),
            mode: Mode::from_byte(data[2])?,
            fan_speed: FanSpeed::from_byte(data[3])?,
            current_temp: profile.decode_temperature(data[4]),
            error_code: data.get(STATUS_MIN_SIZE).copied().unwrap_or(0),
        })
    }

    fn encode_fields(&self, buf: &mut Vec<u8>, profile: &WireProfile) -> ProtocolResult<()> {
        buf.push(if self.power { POWER_ON } else { POWER_OFF });
        buf.push(profile.encode_temperature(self.set_point)?);
        buf.push(self.mode.to_byte());
        buf.push(self.fan_speed.to_byte());
        buf.push(profile.encode_temperature(self.current_temp)?);
        buf.push(self.error_code);
        Ok(())
    }

    /// Payload of an addressed status frame for this report.
    pub fn to_payload(&self, profile: &WireProfile) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(STATUS_MIN_SIZE + 1);
        self.encode_fields(&mut buf, profile)?;
        Ok(buf)
    }

    /// Payload of a broadcast status frame carrying several reports.
    pub fn to_records(reports: &[StatusReport], profile: &WireProfile) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(reports.len() * STATUS_RECORD_SIZE);
        for report in reports {
            buf.extend_from_slice(&DeviceAddress::to_wire(Some(report.address)));
            report.encode_fields(&mut buf, profile)?;
        }
        Ok(buf)
    }
}

/// A change to one unit's state decoded from a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceUpdate {
    /// Complete status report.
    Status(StatusReport),
    /// Control echo: power changed.
    Power { address: DeviceAddress, on: bool },
    /// Control echo: mode changed.
    Mode { address: DeviceAddress, mode: Mode },
    /// Control echo: fan speed changed.
    FanSpeed {
        address: DeviceAddress,
        speed: FanSpeed,
    },
    /// Control echo: set point changed.
    SetPoint {
        address: DeviceAddress,
        celsius: f32,
    },
}

impl DeviceUpdate {
    /// The unit this update applies to.
    pub fn address(&self) -> DeviceAddress {
        match self {
            DeviceUpdate::Status(report) => report.address,
            DeviceUpdate::Power { address, .. }
            | DeviceUpdate::Mode { address, .. }
            | DeviceUpdate::FanSpeed { address, .. }
            | DeviceUpdate::SetPoint { address, .. } => *address,
        }
    }
}

/// Decode the device updates carried by a frame.
///
/// Status pushes yield one update per reported unit; control echoes yield a
/// single partial update. Frames with an unknown command code are rejected.
pub fn decode_updates(frame: &Frame, profile: &WireProfile) -> ProtocolResult<Vec<DeviceUpdate>> {
    match frame {
        Frame::StatusPush(body) => match body.address {
            Some(address) => Ok(vec![DeviceUpdate::Status(StatusReport::decode_fields(
                address,
                &body.payload,
                profile,
            )?)]),
            None => decode_records(&body.payload, profile),
        },
        Frame::CommandReply(body) => {
            let address = body.address.ok_or_else(|| {
                ProtocolError::ParseError(format!("{} echo without a unit address", body.command))
            })?;
            let value = *body.payload.first().ok_or(ProtocolError::FrameTooShort {
                expected: 1,
                actual: 0,
            })?;
            let update = match body.command {
                CommandKind::Power => DeviceUpdate::Power {
                    address,
                    on: value % 2 == POWER_ON,
                },
                CommandKind::Mode => DeviceUpdate::Mode {
                    address,
                    mode: Mode::from_byte(value)?,
                },
                CommandKind::FanSpeed => DeviceUpdate::FanSpeed {
                    address,
                    speed: FanSpeed::from_byte(value)?,
                },
                CommandKind::Temperature => DeviceUpdate::SetPoint {
                    address,
                    celsius: profile.decode_temperature(value),
                },
                other => {
                    return Err(ProtocolError::ParseError(format!(
                        "{} is not a control command",
                        other
                    )))
                }
            };
            Ok(vec![update])
        }
        Frame::Unknown(body) => Err(ProtocolError::ParseError(format!(
            "no device update for command {}",
            body.command
        ))),
    }
}

fn decode_records(payload: &[u8], profile: &WireProfile) -> ProtocolResult<Vec<DeviceUpdate>> {
    if payload.len() % STATUS_RECORD_SIZE != 0 {
        return Err(ProtocolError::ParseError(format!(
            "broadcast status payload of {} bytes is not a multiple of {}",
            payload.len(),
            STATUS_RECORD_SIZE
        )));
    }

    payload
        .chunks_exact(STATUS_RECORD_SIZE)
        .map(|record| {
            let address = DeviceAddress::from_wire([record[0], record[1], record[2]])
                .ok_or_else(|| {
                    ProtocolError::ParseError("broadcast address inside a status record".into())
                })?;
            StatusReport::decode_fields(address, &record[ADDRESS_SIZE..], profile)
                .map(DeviceUpdate::Status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, encode, Decoded, FrameBody};
    use bytes::Bytes;

    const ADDR: DeviceAddress = DeviceAddress::new(1, 1, 3);

    fn report(address: DeviceAddress, set_point: f32) -> StatusReport {
        StatusReport {
            address,
            power: true,
            mode: Mode::Cool,
            fan_speed: FanSpeed::Auto,
            set_point,
            current_temp: 23.0,
            error_code: 0,
        }
    }

    fn frame(command: CommandKind, address: Option<DeviceAddress>, payload: &[u8]) -> Frame {
        let profile = WireProfile::default();
        let wire = encode(command, address, payload, &profile).unwrap();
        match decode(&wire, &profile).0 {
            Decoded::Frame(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    /// A frame whose payload the decoder would have refused to frame.
    fn unframed(command: CommandKind, address: Option<DeviceAddress>, payload: &[u8]) -> Frame {
        Frame::from_body(FrameBody {
            command,
            address,
            payload: Bytes::copy_from_slice(payload),
            raw: Bytes::new(),
        })
    }

    #[test]
    fn test_decode_addressed_status() {
        let profile = WireProfile::default();
        let expected = report(ADDR, 22.5);
        let payload = expected.to_payload(&profile).unwrap();

        let updates = decode_updates(&frame(CommandKind::Status, Some(ADDR), &payload), &profile).unwrap();
        assert_eq!(updates, vec![DeviceUpdate::Status(expected)]);
    }

    #[test]
    fn test_decode_status_with_padding_and_odd_power() {
        let profile = WireProfile::default();
        // power byte 0x03 is "on" (modulo 2), error code 7, two padding bytes
        let payload = [0x03, 48, MODE_HEAT, FAN_MID_LOW, 40, 7, 0, 0];
        let updates = decode_updates(&frame(CommandKind::Status, Some(ADDR), &payload), &profile).unwrap();

        let DeviceUpdate::Status(report) = updates[0] else {
            panic!("expected a status update");
        };
        assert!(report.power);
        assert_eq!(report.mode, Mode::Heat);
        assert_eq!(report.fan_speed, FanSpeed::Mid);
        assert_eq!(report.set_point, 24.0);
        assert_eq!(report.current_temp, 20.0);
        assert_eq!(report.error_code, 7);
    }

    #[test]
    fn test_decode_broadcast_records() {
        let profile = WireProfile::default();
        let reports = [report(ADDR, 22.0), report(DeviceAddress::new(1, 2, 1), 26.0)];
        let payload = StatusReport::to_records(&reports, &profile).unwrap();
        assert_eq!(payload.len(), 2 * STATUS_RECORD_SIZE);

        let updates = decode_updates(&frame(CommandKind::Status, None, &payload), &profile).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].address(), DeviceAddress::new(1, 2, 1));
    }

    #[test]
    fn test_decode_control_echoes() {
        let profile = WireProfile::default();
        let cases = [
            (CommandKind::Power, POWER_OFF, DeviceUpdate::Power { address: ADDR, on: false }),
            (CommandKind::Mode, MODE_AUTO, DeviceUpdate::Mode { address: ADDR, mode: Mode::Auto }),
            (
                CommandKind::FanSpeed,
                FAN_HIGH,
                DeviceUpdate::FanSpeed { address: ADDR, speed: FanSpeed::High },
            ),
            (
                CommandKind::Temperature,
                45,
                DeviceUpdate::SetPoint { address: ADDR, celsius: 22.5 },
            ),
        ];

        for (kind, value, expected) in cases {
            let updates = decode_updates(&frame(kind, Some(ADDR), &[value]), &profile).unwrap();
            assert_eq!(updates, vec![expected]);
        }
    }

    #[test]
    fn test_malformed_payloads() {
        let profile = WireProfile::default();

        let short = unframed(CommandKind::Status, Some(ADDR), &[1, 44]);
        assert!(matches!(
            decode_updates(&short, &profile),
            Err(ProtocolError::FrameTooShort { .. })
        ));

        let bad_mode = frame(CommandKind::Status, Some(ADDR), &[1, 44, 0x40, 0, 46]);
        assert!(matches!(
            decode_updates(&bad_mode, &profile),
            Err(ProtocolError::UnknownValue { field: "mode", .. })
        ));

        let ragged = unframed(CommandKind::Status, None, &[1, 1, 3, 1]);
        assert!(matches!(decode_updates(&ragged, &profile), Err(ProtocolError::ParseError(_))));

        let empty_echo = unframed(CommandKind::Power, Some(ADDR), &[]);
        assert!(decode_updates(&empty_echo, &profile).is_err());

        let unknown = frame(CommandKind::Other(0x60), Some(ADDR), &[1]);
        assert!(matches!(decode_updates(&unknown, &profile), Err(ProtocolError::ParseError(_))));
    }

    #[test]
    fn test_empty_broadcast_status_has_no_updates() {
        let profile = WireProfile::default();
        let updates = decode_updates(&frame(CommandKind::Status, None, &[]), &profile).unwrap();
        assert!(updates.is_empty());
    }
}
