//! Protocol-level error type.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS wire structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Not enough bytes for a complete packet.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Unknown bits in the packet status byte.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Declared packet length is smaller than the header or above the maximum.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(usize),

    /// Input ended in the middle of a structure.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Unknown token type byte.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// Unknown pre-login option byte.
    #[error("invalid pre-login option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Pre-login option table is inconsistent with its data section.
    #[error("malformed pre-login message: {0}")]
    MalformedPreLogin(&'static str),

    /// Unknown data type tag.
    #[error("unknown data type: 0x{0:02X}")]
    UnknownDataType(u8),

    /// Text could not be decoded.
    #[error("invalid string encoding: {0}")]
    StringEncoding(&'static str),

    /// A field does not fit in its wire representation.
    #[error("field {field} too long: {len} exceeds {max}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },
}
