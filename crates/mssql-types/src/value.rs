//! SQL value representation.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::error::TypeError;
use crate::from_sql::FromSql;
use crate::numeric::Numeric;

/// A SQL value that can represent any SQL Server data type.
///
/// Decoded row values and RPC parameters share this type. Which variant a
/// column decodes to is fixed by its wire type, not by its declared SQL name:
/// MONEY and SMALLMONEY decode to [`SqlValue::Decimal`] with scale 4, all
/// character types decode to [`SqlValue::String`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// NULL value.
    #[default]
    Null,
    /// Boolean value (BIT).
    Bool(bool),
    /// 8-bit unsigned integer (TINYINT).
    TinyInt(u8),
    /// 16-bit signed integer (SMALLINT).
    SmallInt(i16),
    /// 32-bit signed integer (INT).
    Int(i32),
    /// 64-bit signed integer (BIGINT).
    BigInt(i64),
    /// 32-bit floating point (REAL).
    Float(f32),
    /// 64-bit floating point (FLOAT).
    Double(f64),
    /// Exact decimal (DECIMAL, NUMERIC, MONEY, SMALLMONEY).
    Decimal(Numeric),
    /// String value (CHAR, VARCHAR, NCHAR, NVARCHAR, TEXT, NTEXT).
    String(String),
    /// Binary value (BINARY, VARBINARY, IMAGE).
    Binary(Bytes),
    /// UUID value (UNIQUEIDENTIFIER).
    Uuid(Uuid),
    /// Date value (DATE).
    Date(NaiveDate),
    /// Time value (TIME).
    Time(NaiveTime),
    /// DateTime value (DATETIME, DATETIME2, SMALLDATETIME).
    DateTime(NaiveDateTime),
    /// DateTimeOffset value (DATETIMEOFFSET).
    DateTimeOffset(DateTime<FixedOffset>),
    /// XML value (XML type).
    Xml(String),
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Read the value as `T`.
    pub fn get<T: FromSql>(&self) -> Result<T, TypeError> {
        T::from_sql(self)
    }

    /// Upper-case SQL name of the variant, used in conversion errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BIT",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INT",
            Self::BigInt(_) => "BIGINT",
            Self::Float(_) => "REAL",
            Self::Double(_) => "FLOAT",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "NVARCHAR",
            Self::Binary(_) => "VARBINARY",
            Self::Uuid(_) => "UNIQUEIDENTIFIER",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "DATETIME2",
            Self::DateTimeOffset(_) => "DATETIMEOFFSET",
            Self::Xml(_) => "XML",
        }
    }
}

macro_rules! from_variant {
    ($($ty:ty => $variant:ident),+ $(,)?) => {$(
        impl From<$ty> for SqlValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        }
    )+};
}

from_variant!(
    bool => Bool,
    u8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    Numeric => Decimal,
    String => String,
    Bytes => Binary,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
);

impl From<rust_decimal::Decimal> for SqlValue {
    fn from(v: rust_decimal::Decimal) -> Self {
        Self::Decimal(Numeric::from(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_pick_the_wire_variant() {
        assert_eq!(SqlValue::from(5u8), SqlValue::TinyInt(5));
        assert_eq!(SqlValue::from("a"), SqlValue::String("a".into()));
        assert_eq!(SqlValue::from(vec![1u8]), SqlValue::Binary(Bytes::from_static(&[1])));
        assert_eq!(SqlValue::from(None::<i32>), SqlValue::Null);
        assert!(matches!(
            SqlValue::from(rust_decimal::Decimal::new(15, 1)),
            SqlValue::Decimal(n) if n.scale() == 1
        ));
    }

    #[test]
    fn test_get() {
        assert_eq!(SqlValue::SmallInt(3).get::<i64>().unwrap(), 3);
        assert!(SqlValue::Null.get::<i32>().is_err());
        assert_eq!(SqlValue::Null.get::<Option<i32>>().unwrap(), None);
    }
}
