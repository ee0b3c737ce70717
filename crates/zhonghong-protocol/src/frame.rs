//! Frame encoding/decoding utilities.
//!
//! ```text
//! +----------+--------+--------+------+---------+---------+------------+----------+
//! | preamble | length | system | area | address | command | payload... | checksum |
//! +----------+--------+--------+------+---------+---------+------------+----------+
//! ```
//!
//! `length` counts the address triple and the payload. The checksum is the
//! mod-256 sum of every byte before it, preamble included.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::*;
use crate::error::*;
use crate::types::*;

/// Maximum size of one encoded frame.
pub const MAX_FRAME_SIZE: usize = FRAME_PREFIX_SIZE + u8::MAX as usize + 2;

/// Additive mod-256 checksum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Contents shared by every decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBody {
    /// Command carried by the frame.
    pub command: CommandKind,
    /// Target unit; `None` for broadcast frames.
    pub address: Option<DeviceAddress>,
    /// Bytes between the command code and the checksum.
    pub payload: Bytes,
    /// The complete frame as received, preamble to checksum.
    pub raw: Bytes,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Echo of a control command (power, mode, fan speed, temperature).
    CommandReply(FrameBody),
    /// Status report for one unit or, when broadcast, for many.
    StatusPush(FrameBody),
    /// A well-formed frame whose command code the profile does not know.
    Unknown(FrameBody),
}

impl Frame {
    /// Classify a frame body by its command kind.
    pub fn from_body(body: FrameBody) -> Self {
        match body.command {
            CommandKind::Status => Frame::StatusPush(body),
            kind if kind.is_control() => Frame::CommandReply(body),
            _ => Frame::Unknown(body),
        }
    }

    pub fn body(&self) -> &FrameBody {
        match self {
            Frame::CommandReply(body) | Frame::StatusPush(body) | Frame::Unknown(body) => body,
        }
    }

    pub fn command(&self) -> CommandKind {
        self.body().command
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.body().address
    }

    pub fn payload(&self) -> &[u8] {
        &self.body().payload
    }

    pub fn raw(&self) -> &[u8] {
        &self.body().raw
    }

    /// Re-check the checksum carried in `raw`.
    pub fn verify_checksum(&self) -> ProtocolResult<()> {
        let raw = self.raw();
        let Some((&actual, rest)) = raw.split_last() else {
            return Err(ProtocolError::FrameTooShort {
                expected: MIN_FRAME_SIZE,
                actual: 0,
            });
        };
        let expected = checksum(rest);
        if expected == actual {
            Ok(())
        } else {
            Err(ProtocolError::ChecksumMismatch { expected, actual })
        }
    }

    /// Raw bytes as a space-separated hex string, for logs.
    pub fn to_hex(&self) -> String {
        hex_dump(self.raw())
    }
}

/// Format bytes as space-separated hex pairs.
pub fn hex_dump(bytes: &[u8]) -> String {
    let encoded = hex::encode(bytes);
    let mut out = String::with_capacity(encoded.len() + bytes.len());
    for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.extend(pair.iter().map(|&c| c as char));
    }
    out
}

/// Outcome of one [`decode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame with a valid checksum.
    Frame(Frame),
    /// The buffer ends inside a frame; keep buffering.
    NeedMoreData,
    /// A frame candidate failed validation and one byte was skipped.
    ChecksumError(ProtocolError),
}

/// Encode a frame.
///
/// A `None` address encodes as the broadcast triple.
pub fn encode(
    command: CommandKind,
    address: Option<DeviceAddress>,
    payload: &[u8],
    profile: &WireProfile,
) -> ProtocolResult<Bytes> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLong {
            max: MAX_PAYLOAD_SIZE,
            actual: payload.len(),
        });
    }

    let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + payload.len());
    buf.put_u8(profile.preamble);
    buf.put_u8((ADDRESS_SIZE + payload.len()) as u8);
    buf.put_slice(&DeviceAddress::to_wire(address));
    buf.put_u8(profile.code_of(command));
    buf.put_slice(payload);
    let sum = checksum(&buf);
    buf.put_u8(sum);
    Ok(buf.freeze())
}

/// Decode the first frame in `buf`.
///
/// Returns the outcome and how many bytes the caller should drop from the
/// front of its buffer. Bytes before the first preamble are always consumed.
/// On a checksum failure exactly one byte past them is consumed, so the next
/// call resumes scanning at the following preamble candidate.
pub fn decode(buf: &[u8], profile: &WireProfile) -> (Decoded, usize) {
    let Some(start) = buf.iter().position(|&b| b == profile.preamble) else {
        return (Decoded::NeedMoreData, buf.len());
    };
    if start > 0 {
        log::trace!("skipping {} bytes before preamble", start);
    }

    let candidate = &buf[start..];
    if candidate.len() < FRAME_PREFIX_SIZE {
        return (Decoded::NeedMoreData, start);
    }

    let length = candidate[1] as usize;
    if length < ADDRESS_SIZE {
        return (
            Decoded::ChecksumError(ProtocolError::FrameTooShort {
                expected: ADDRESS_SIZE,
                actual: length,
            }),
            start + 1,
        );
    }

    // The header through the command byte decides whether the length is possible.
    if candidate.len() < MIN_FRAME_SIZE - 1 {
        return (Decoded::NeedMoreData, start);
    }
    let code = candidate[5];
    let broadcast = candidate[2..5] == [BROADCAST; ADDRESS_SIZE];
    if !length_fits(profile.kind_of(code), broadcast, length) {
        log::debug!("length {} impossible for command 0x{:02X}, resyncing", length, code);
        return (
            Decoded::ChecksumError(ProtocolError::UnexpectedLength { code, length }),
            start + 1,
        );
    }

    // prefix + address + payload + command + checksum
    let total = FRAME_PREFIX_SIZE + length + 2;
    if candidate.len() < total {
        return (Decoded::NeedMoreData, start);
    }

    let expected = checksum(&candidate[..total - 1]);
    let actual = candidate[total - 1];
    if expected != actual {
        log::debug!(
            "checksum mismatch (0x{:02X} != 0x{:02X}), resyncing: [{}]",
            expected,
            actual,
            hex_dump(&candidate[..total])
        );
        return (
            Decoded::ChecksumError(ProtocolError::ChecksumMismatch { expected, actual }),
            start + 1,
        );
    }

    let raw = Bytes::copy_from_slice(&candidate[..total]);
    let address = DeviceAddress::from_wire([raw[2], raw[3], raw[4]]);
    let command = profile.kind_of(raw[5]);
    let payload = raw.slice(MIN_FRAME_SIZE - 1..total - 1);

    let frame = Frame::from_body(FrameBody {
        command,
        address,
        payload,
        raw,
    });
    (Decoded::Frame(frame), start + total)
}

/// Whether a length field of `length` is possible for `command`.
///
/// Control frames carry one value byte. Addressed status frames are either a
/// bare query or a full report, broadcast ones a whole number of records.
/// Unknown commands are not checked.
fn length_fits(command: CommandKind, broadcast: bool, length: usize) -> bool {
    let payload = length - ADDRESS_SIZE;
    match command {
        CommandKind::Status if broadcast => payload % STATUS_RECORD_SIZE == 0,
        CommandKind::Status => payload == 0 || payload >= STATUS_MIN_SIZE,
        kind if kind.is_control() => payload == 1,
        _ => true,
    }
}

/// A codec that accumulates received bytes and yields decoded frames.
#[derive(Debug)]
pub struct FrameCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    profile: WireProfile,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new(profile: WireProfile) -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(MAX_FRAME_SIZE * 4),
            profile,
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer.
    ///
    /// Returns `None` once more data is needed.
    pub fn next(&mut self) -> Option<Decoded> {
        let (decoded, consumed) = decode(&self.buffer, &self.profile);
        self.buffer.advance(consumed);
        match decoded {
            Decoded::NeedMoreData => None,
            other => Some(other),
        }
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn profile(&self) -> &WireProfile {
        &self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: DeviceAddress = DeviceAddress::new(1, 1, 3);

    fn frame_of(decoded: Decoded) -> Frame {
        match decoded {
            Decoded::Frame(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_layout() {
        let profile = WireProfile::default();
        let encoded = encode(CommandKind::Power, Some(ADDR), &[POWER_ON], &profile).unwrap();

        assert_eq!(encoded.len(), MIN_FRAME_SIZE + 1);
        assert_eq!(encoded[0], DEFAULT_PREAMBLE);
        assert_eq!(encoded[1], 4); // address + one payload byte
        assert_eq!(&encoded[2..5], &[1, 1, 3]);
        assert_eq!(encoded[5], CODE_POWER);
        assert_eq!(encoded[6], POWER_ON);
        assert_eq!(encoded[7], checksum(&encoded[..7]));
    }

    #[test]
    fn test_decode_round_trip() {
        let profile = WireProfile::default();
        let cases: [(CommandKind, Option<DeviceAddress>, &[u8]); 3] = [
            (CommandKind::Temperature, Some(ADDR), &[45]),
            (CommandKind::Status, None, &[]),
            (CommandKind::Other(0x7F), Some(DeviceAddress::new(2, 9, 0)), &[1, 2, 3, 4]),
        ];

        for (command, address, payload) in cases {
            let encoded = encode(command, address, payload, &profile).unwrap();
            let (decoded, consumed) = decode(&encoded, &profile);
            assert_eq!(consumed, encoded.len());

            let frame = frame_of(decoded);
            assert_eq!(frame.command(), command);
            assert_eq!(frame.address(), address);
            assert_eq!(frame.payload(), payload);
            assert_eq!(frame.raw(), &encoded[..]);
            assert!(frame.verify_checksum().is_ok());
        }
    }

    #[test]
    fn test_frame_variants() {
        let profile = WireProfile::default();
        let reply = encode(CommandKind::Mode, Some(ADDR), &[MODE_HEAT], &profile).unwrap();
        let push = encode(CommandKind::Status, Some(ADDR), &[1, 44, 1, 2, 46], &profile).unwrap();
        let unknown = encode(CommandKind::Other(0x10), Some(ADDR), &[], &profile).unwrap();

        assert!(matches!(frame_of(decode(&reply, &profile).0), Frame::CommandReply(_)));
        assert!(matches!(frame_of(decode(&push, &profile).0), Frame::StatusPush(_)));
        assert!(matches!(frame_of(decode(&unknown, &profile).0), Frame::Unknown(_)));
    }

    #[test]
    fn test_decode_partial() {
        let mut codec = FrameCodec::new(WireProfile::default());
        let encoded = encode(CommandKind::Status, Some(ADDR), &[1, 44, 1, 2, 46, 0], codec.profile()).unwrap();

        codec.push(&encoded[..4]);
        assert!(codec.next().is_none());
        assert_eq!(codec.buffered_len(), 4);

        codec.push(&encoded[4..]);
        let frame = frame_of(codec.next().expect("should decode frame"));
        assert_eq!(frame.payload(), &[1, 44, 1, 2, 46, 0]);
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_decode_multiple_with_garbage() {
        let profile = WireProfile::default();
        let first = encode(CommandKind::Power, Some(ADDR), &[POWER_OFF], &profile).unwrap();
        let second = encode(CommandKind::FanSpeed, Some(ADDR), &[FAN_LOW], &profile).unwrap();

        let mut codec = FrameCodec::new(profile);
        codec.push(&[0x00, 0x13, 0x37]);
        codec.push(&first);
        codec.push(&second);

        assert_eq!(frame_of(codec.next().unwrap()).command(), CommandKind::Power);
        assert_eq!(frame_of(codec.next().unwrap()).command(), CommandKind::FanSpeed);
        assert!(codec.next().is_none());
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_corrupted_frame_resyncs() {
        let profile = WireProfile::default();
        let mut corrupted = encode(CommandKind::Status, Some(ADDR), &[1, 44, 1, 2, 46, 0], &profile)
            .unwrap()
            .to_vec();
        corrupted[8] ^= 0x01;
        let valid = encode(CommandKind::Temperature, Some(ADDR), &[46], &profile).unwrap();

        let mut codec = FrameCodec::new(profile);
        codec.push(&corrupted);
        codec.push(&valid);

        assert!(matches!(
            codec.next(),
            Some(Decoded::ChecksumError(ProtocolError::ChecksumMismatch { .. }))
        ));
        let frame = frame_of(codec.next().expect("valid frame after resync"));
        assert_eq!(frame.command(), CommandKind::Temperature);
        assert_eq!(frame.payload(), &[46]);
        assert!(codec.next().is_none());
    }

    #[test]
    fn test_checksum_error_consumes_one_byte() {
        let profile = WireProfile::default();
        let mut bytes = encode(CommandKind::Power, Some(ADDR), &[POWER_ON], &profile)
            .unwrap()
            .to_vec();
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);

        let mut stream = vec![0x01, 0x02];
        stream.extend_from_slice(&bytes);
        let (decoded, consumed) = decode(&stream, &profile);
        assert!(matches!(decoded, Decoded::ChecksumError(_)));
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_impossible_length_is_rejected() {
        let profile = WireProfile::default();
        let (decoded, consumed) = decode(&[DEFAULT_PREAMBLE, 0x01, 0x00, 0x00], &profile);
        assert!(matches!(
            decoded,
            Decoded::ChecksumError(ProtocolError::FrameTooShort { .. })
        ));
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_raised_length_does_not_stall_later_frames() {
        let profile = WireProfile::default();
        let mut corrupted = encode(CommandKind::Power, Some(ADDR), &[POWER_ON], &profile)
            .unwrap()
            .to_vec();
        corrupted[1] = 0xF0;
        let valid = encode(CommandKind::Temperature, Some(ADDR), &[46], &profile).unwrap();

        let mut codec = FrameCodec::new(profile);
        codec.push(&corrupted);
        codec.push(&valid);

        assert!(matches!(
            codec.next(),
            Some(Decoded::ChecksumError(ProtocolError::UnexpectedLength { length: 0xF0, .. }))
        ));
        let mut frames = Vec::new();
        while let Some(decoded) = codec.next() {
            if let Decoded::Frame(frame) = decoded {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command(), CommandKind::Temperature);
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_lowered_length_is_rejected() {
        let profile = WireProfile::default();
        let mut corrupted = encode(CommandKind::Status, Some(ADDR), &[1, 44, 1, 2, 46, 0], &profile)
            .unwrap()
            .to_vec();
        corrupted[1] = ADDRESS_SIZE as u8 + 2;

        let (decoded, consumed) = decode(&corrupted, &profile);
        assert!(matches!(
            decoded,
            Decoded::ChecksumError(ProtocolError::UnexpectedLength { .. })
        ));
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_length_checked_per_command() {
        assert!(length_fits(CommandKind::Power, false, ADDRESS_SIZE + 1));
        assert!(!length_fits(CommandKind::Mode, false, ADDRESS_SIZE));
        assert!(!length_fits(CommandKind::Temperature, false, ADDRESS_SIZE + 2));

        // bare queries in both directions
        assert!(length_fits(CommandKind::Status, false, ADDRESS_SIZE));
        assert!(length_fits(CommandKind::Status, true, ADDRESS_SIZE));
        assert!(length_fits(CommandKind::Status, false, ADDRESS_SIZE + STATUS_MIN_SIZE + 3));
        assert!(!length_fits(CommandKind::Status, false, ADDRESS_SIZE + 2));
        assert!(length_fits(CommandKind::Status, true, ADDRESS_SIZE + 3 * STATUS_RECORD_SIZE));
        assert!(!length_fits(CommandKind::Status, true, ADDRESS_SIZE + STATUS_RECORD_SIZE + 1));

        assert!(length_fits(CommandKind::Other(0x7F), false, 200));
    }

    #[test]
    fn test_header_needed_before_length_check() {
        let profile = WireProfile::default();
        let (decoded, consumed) = decode(&[DEFAULT_PREAMBLE, 0xF0, 0x01, 0x01], &profile);
        assert_eq!(decoded, Decoded::NeedMoreData);
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_no_preamble_drops_everything() {
        let profile = WireProfile::default();
        let (decoded, consumed) = decode(&[0x01, 0x02, 0x03], &profile);
        assert_eq!(decoded, Decoded::NeedMoreData);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let profile = WireProfile::default();
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            encode(CommandKind::Status, None, &payload, &profile),
            Err(ProtocolError::FrameTooLong { .. })
        ));
    }

    #[test]
    fn test_custom_preamble() {
        let profile = WireProfile {
            preamble: 0x7E,
            ..WireProfile::default()
        };
        let encoded = encode(CommandKind::Power, Some(ADDR), &[POWER_ON], &profile).unwrap();
        assert_eq!(encoded[0], 0x7E);

        // The default profile does not see a frame start here.
        let (decoded, _) = decode(&encoded, &WireProfile::default());
        assert!(!matches!(decoded, Decoded::Frame(_)));

        let (decoded, _) = decode(&encoded, &profile);
        assert!(matches!(decoded, Decoded::Frame(Frame::CommandReply(_))));
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0xAA, 0x04, 0x01]), "aa 04 01");
        assert_eq!(hex_dump(&[]), "");
    }
}
