//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with the gateway protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame checksum does not match its contents.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },

    /// Frame or payload is too short to be valid.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Length field cannot belong to a frame with this command code.
    #[error("length {length} is impossible for command 0x{code:02X}")]
    UnexpectedLength {
        /// Command code of the frame candidate.
        code: u8,
        /// Value of the length field.
        length: usize,
    },

    /// Payload does not fit the one-byte length field.
    #[error("frame too long: maximum {max} payload bytes, got {actual}")]
    FrameTooLong {
        /// Maximum allowed payload length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// A value byte has no meaning for the given field.
    #[error("unknown {field} value: 0x{value:02X}")]
    UnknownValue {
        /// Field being decoded.
        field: &'static str,
        /// Offending byte.
        value: u8,
    },

    /// Payload is malformed for its command kind.
    #[error("failed to parse payload: {0}")]
    ParseError(String),

    /// Value cannot be encoded on the wire.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
