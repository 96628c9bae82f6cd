//! Extraction of Rust values from decoded column and return values.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::SqlValue;

/// Types a [`SqlValue`] can be read into.
///
/// Integer targets accept any narrower or wider integer column as long as
/// the value fits; reading NULL into a non-`Option` target is
/// [`TypeError::UnexpectedNull`].
pub trait FromSql: Sized {
    /// Convert from a SQL value to this type.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Like [`from_sql`](Self::from_sql), with NULL mapped to `None`.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn mismatch<T>(expected: &'static str, value: &SqlValue) -> Result<T, TypeError> {
    match value {
        SqlValue::Null => Err(TypeError::UnexpectedNull),
        other => Err(TypeError::TypeMismatch {
            expected,
            actual: other.type_name().to_string(),
        }),
    }
}

fn narrow<S, T: TryFrom<S>>(value: S, target_type: &'static str) -> Result<T, TypeError> {
    T::try_from(value).map_err(|_| TypeError::OutOfRange { target_type })
}

macro_rules! from_sql {
    ($ty:ty, $name:literal, |$v:ident| { $($pat:pat => $e:expr),+ $(,)? }) => {
        impl FromSql for $ty {
            fn from_sql($v: &SqlValue) -> Result<Self, TypeError> {
                match $v {
                    $($pat => $e,)+
                    other => mismatch($name, other),
                }
            }
        }
    };
}

macro_rules! from_sql_int {
    ($($ty:ty => $name:literal),+ $(,)?) => {$(
        from_sql!($ty, $name, |value| {
            SqlValue::TinyInt(v) => narrow(*v, $name),
            SqlValue::SmallInt(v) => narrow(*v, $name),
            SqlValue::Int(v) => narrow(*v, $name),
            SqlValue::BigInt(v) => narrow(*v, $name),
        });
    )+};
}

from_sql_int!(u8 => "u8", i16 => "i16", i32 => "i32", i64 => "i64");

from_sql!(bool, "bool", |value| {
    SqlValue::Bool(v) => Ok(*v),
    SqlValue::TinyInt(v) => Ok(*v != 0),
    SqlValue::SmallInt(v) => Ok(*v != 0),
    SqlValue::Int(v) => Ok(*v != 0),
});

from_sql!(f32, "f32", |value| {
    SqlValue::Float(v) => Ok(*v),
});

from_sql!(f64, "f64", |value| {
    SqlValue::Double(v) => Ok(*v),
    SqlValue::Float(v) => Ok(f64::from(*v)),
    SqlValue::Decimal(v) => Ok(v.to_f64()),
});

from_sql!(String, "String", |value| {
    SqlValue::String(v) | SqlValue::Xml(v) => Ok(v.clone()),
});

from_sql!(Vec<u8>, "Vec<u8>", |value| {
    SqlValue::Binary(v) => Ok(v.to_vec()),
});

from_sql!(bytes::Bytes, "Bytes", |value| {
    SqlValue::Binary(v) => Ok(v.clone()),
});

from_sql!(Uuid, "Uuid", |value| {
    SqlValue::Uuid(v) => Ok(*v),
    SqlValue::String(s) => s
        .parse()
        .map_err(|e| TypeError::InvalidEncoding(format!("uuid: {e}"))),
});

from_sql!(Numeric, "Numeric", |value| {
    SqlValue::Decimal(v) => Ok(*v),
    SqlValue::TinyInt(v) => Numeric::new(i128::from(*v), 0),
    SqlValue::SmallInt(v) => Numeric::new(i128::from(*v), 0),
    SqlValue::Int(v) => Numeric::new(i128::from(*v), 0),
    SqlValue::BigInt(v) => Numeric::new(i128::from(*v), 0),
});

from_sql!(Decimal, "Decimal", |value| {
    SqlValue::Decimal(v) => v.to_decimal(),
    SqlValue::TinyInt(v) => Ok(Decimal::from(*v)),
    SqlValue::SmallInt(v) => Ok(Decimal::from(*v)),
    SqlValue::Int(v) => Ok(Decimal::from(*v)),
    SqlValue::BigInt(v) => Ok(Decimal::from(*v)),
});

from_sql!(NaiveDate, "NaiveDate", |value| {
    SqlValue::Date(v) => Ok(*v),
    SqlValue::DateTime(v) => Ok(v.date()),
});

from_sql!(NaiveTime, "NaiveTime", |value| {
    SqlValue::Time(v) => Ok(*v),
    SqlValue::DateTime(v) => Ok(v.time()),
});

from_sql!(NaiveDateTime, "NaiveDateTime", |value| {
    SqlValue::DateTime(v) => Ok(*v),
    SqlValue::Date(v) => Ok(v.and_time(NaiveTime::MIN)),
    SqlValue::DateTimeOffset(v) => Ok(v.naive_utc()),
});

from_sql!(DateTime<FixedOffset>, "DateTime<FixedOffset>", |value| {
    SqlValue::DateTimeOffset(v) => Ok(*v),
});

from_sql!(DateTime<Utc>, "DateTime<Utc>", |value| {
    SqlValue::DateTimeOffset(v) => Ok(v.to_utc()),
    SqlValue::DateTime(v) => Ok(DateTime::from_naive_utc_and_offset(*v, Utc)),
});

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}
