//! Parameter binding for Rust values.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::encode::TdsEncode;
use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::SqlValue;

/// Types that can be bound as RPC parameters.
///
/// ```rust
/// use mssql_types::{SqlValue, ToSql};
///
/// assert_eq!(42i32.to_sql().unwrap(), SqlValue::Int(42));
/// assert_eq!("hi".declared_type().unwrap(), "nvarchar(4000)");
/// ```
pub trait ToSql {
    /// Convert this value to a SQL value.
    fn to_sql(&self) -> Result<SqlValue, TypeError>;

    /// SQL declaration the parameter is sent with.
    fn declared_type(&self) -> Result<Cow<'static, str>, TypeError> {
        Ok(self.to_sql()?.param_type())
    }
}

macro_rules! to_sql_copy {
    ($($ty:ty),+ $(,)?) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> Result<SqlValue, TypeError> {
                Ok(SqlValue::from(*self))
            }
        }
    )+};
}

to_sql_copy!(
    bool,
    u8,
    i16,
    i32,
    i64,
    f32,
    f64,
    Numeric,
    Decimal,
    Uuid,
    NaiveDate,
    NaiveTime,
    NaiveDateTime,
    DateTime<FixedOffset>,
);

impl ToSql for SqlValue {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(self.clone())
    }
}

impl ToSql for str {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::String(self.to_owned()))
    }
}

impl ToSql for String {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        self.as_str().to_sql()
    }
}

impl ToSql for [u8] {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(bytes::Bytes::copy_from_slice(self)))
    }
}

impl ToSql for Vec<u8> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        self.as_slice().to_sql()
    }
}

impl ToSql for bytes::Bytes {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(self.clone()))
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        self.as_ref().map_or(Ok(SqlValue::Null), ToSql::to_sql)
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        (**self).to_sql()
    }
}
