//! Type conversion error types.

use tds_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur while decoding, encoding or converting values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TypeError {
    /// Value is null when non-null was expected.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Type mismatch during conversion.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        actual: String,
    },

    /// Value is out of range for target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// Invalid encoding in string data.
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// Invalid date/time value.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Invalid decimal value.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    /// A length prefix that the type does not allow.
    #[error("invalid length {length} for {type_name}")]
    InvalidLength {
        /// SQL type being decoded.
        type_name: &'static str,
        /// Offending length.
        length: usize,
    },

    /// The data type id has no value decoder.
    #[error("unsupported data type 0x{0:02X}")]
    UnsupportedType(u8),

    /// Malformed wire data underneath the value.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
