//! TDS data type identifiers and column flags.

use bitflags::bitflags;

use crate::error::ProtocolError;

/// TDS data type identifiers as they appear in column metadata and
/// parameter type info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer.
    Int1 = 0x30,
    /// Bit (boolean).
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// 32-bit floating point.
    Float4 = 0x3B,
    /// 64-bit floating point.
    Float8 = 0x3E,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 8-byte legacy datetime.
    DateTime = 0x3D,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,

    /// Nullable datetime (4 or 8 bytes).
    DateTimeN = 0x6F,
    /// Uniqueidentifier.
    Guid = 0x24,
    /// Nullable integer (1, 2, 4 or 8 bytes).
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,
    /// Nullable float (4 or 8 bytes).
    FloatN = 0x6D,
    /// Nullable money (4 or 8 bytes).
    MoneyN = 0x6E,

    /// Legacy fixed-length character.
    Char = 0x2F,
    /// Legacy variable-length character.
    VarChar = 0x27,
    /// Legacy fixed-length binary.
    Binary = 0x2D,
    /// Legacy variable-length binary.
    VarBinary = 0x25,

    /// Variable-length character.
    BigVarChar = 0xA7,
    /// Variable-length binary.
    BigVarBinary = 0xA5,
    /// Fixed-length character.
    BigChar = 0xAF,
    /// Fixed-length binary.
    BigBinary = 0xAD,

    /// Fixed-length Unicode character.
    NChar = 0xEF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,

    /// Text (text-pointer LOB).
    Text = 0x23,
    /// Image (text-pointer LOB).
    Image = 0x22,
    /// NText (text-pointer LOB).
    NText = 0x63,

    /// Date (3 bytes).
    Date = 0x28,
    /// Time with scale.
    Time = 0x29,
    /// DateTime2 with scale.
    DateTime2 = 0x2A,
    /// DateTimeOffset with scale.
    DateTimeOffset = 0x2B,

    /// XML.
    Xml = 0xF1,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        let id = match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x6F => Self::DateTimeN,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0xF1 => Self::Xml,
            _ => return Err(ProtocolError::UnknownDataType(value)),
        };
        Ok(id)
    }

    /// Wire size of fixed-length types, `None` for everything else.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Check if this is a Unicode character type.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Check if the metadata carries a collation.
    #[must_use]
    pub const fn has_collation(&self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::VarChar
                | Self::BigChar
                | Self::BigVarChar
                | Self::NChar
                | Self::NVarChar
                | Self::Text
                | Self::NText
        )
    }
}

bitflags! {
    /// Column flags from COLMETADATA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ColumnFlags: u16 {
        /// Column is nullable.
        const NULLABLE = 0x0001;
        /// Case-sensitive comparison.
        const CASE_SENSITIVE = 0x0002;
        /// Column is updateable.
        const UPDATEABLE = 0x0008;
        /// Identity column.
        const IDENTITY = 0x0010;
        /// Computed column.
        const COMPUTED = 0x0020;
        /// Fixed-length CLR type.
        const FIXED_LEN_CLR = 0x0100;
        /// Sparse column set.
        const SPARSE_COLUMN_SET = 0x0400;
        /// Hidden column (browse mode or cursor bookkeeping).
        const HIDDEN = 0x2000;
        /// Key column.
        const KEY = 0x4000;
        /// Nullable but unknown.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}
