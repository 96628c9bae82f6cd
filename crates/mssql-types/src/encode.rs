//! RPC parameter encoding for SQL values.
//!
//! Every parameter is written as `B_VARCHAR name`, a status byte, TYPE_INFO
//! and the value. The SQL declaration produced by
//! [`TdsEncode::param_type`] always matches the TYPE_INFO written, so the
//! `@params` argument of `sp_prepexec` and friends agrees with the values.

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tds_protocol::rpc::{
    NVARCHAR_MAX_CHARS, write_nvarchar_param, write_param_header, write_plp,
};
use tds_protocol::{ParamStatus, TypeId};

use crate::error::TypeError;
use crate::numeric::{MAX_PRECISION, Numeric};
use crate::value::SqlValue;

/// Largest VARBINARY sent inline; longer values use `varbinary(max)`.
pub const VARBINARY_MAX_BYTES: usize = 8000;

/// Fractional scale used for all TIME family parameters.
const TIME_SCALE: u8 = 7;
const TIME_LEN: usize = 5;
const DECIMAL_LEN: u8 = 17;

/// Trait for encoding values as RPC parameters.
pub trait TdsEncode {
    /// Write a complete parameter: name, status, TYPE_INFO and value.
    fn encode_param(
        &self,
        dst: &mut BytesMut,
        name: &str,
        status: ParamStatus,
    ) -> Result<(), TypeError>;

    /// SQL declaration for this value, e.g. `int` or `nvarchar(4000)`.
    fn param_type(&self) -> Cow<'static, str>;
}

impl TdsEncode for SqlValue {
    fn encode_param(
        &self,
        dst: &mut BytesMut,
        name: &str,
        status: ParamStatus,
    ) -> Result<(), TypeError> {
        match self {
            SqlValue::Null => {
                write_nvarchar_param(dst, name, status, None)?;
                return Ok(());
            }
            SqlValue::String(s) | SqlValue::Xml(s) => {
                write_nvarchar_param(dst, name, status, Some(s))?;
                return Ok(());
            }
            _ => {}
        }

        write_param_header(dst, name, status)?;
        match self {
            SqlValue::Bool(v) => {
                put_sized(dst, TypeId::BitN, 1);
                dst.put_u8(u8::from(*v));
            }
            SqlValue::TinyInt(v) => {
                put_sized(dst, TypeId::IntN, 1);
                dst.put_u8(*v);
            }
            SqlValue::SmallInt(v) => {
                put_sized(dst, TypeId::IntN, 2);
                dst.put_i16_le(*v);
            }
            SqlValue::Int(v) => {
                put_sized(dst, TypeId::IntN, 4);
                dst.put_i32_le(*v);
            }
            SqlValue::BigInt(v) => {
                put_sized(dst, TypeId::IntN, 8);
                dst.put_i64_le(*v);
            }
            SqlValue::Float(v) => {
                put_sized(dst, TypeId::FloatN, 4);
                dst.put_f32_le(*v);
            }
            SqlValue::Double(v) => {
                put_sized(dst, TypeId::FloatN, 8);
                dst.put_f64_le(*v);
            }
            SqlValue::Decimal(n) => encode_decimal(dst, *n),
            SqlValue::Binary(data) => {
                dst.put_u8(TypeId::BigVarBinary as u8);
                if data.len() > VARBINARY_MAX_BYTES {
                    dst.put_u16_le(0xFFFF);
                    write_plp(dst, data);
                } else {
                    dst.put_u16_le(VARBINARY_MAX_BYTES as u16);
                    dst.put_u16_le(data.len() as u16);
                    dst.put_slice(data);
                }
            }
            SqlValue::Uuid(u) => {
                put_sized(dst, TypeId::Guid, 16);
                dst.put_slice(&u.to_bytes_le());
            }
            SqlValue::Date(d) => {
                dst.put_u8(TypeId::Date as u8);
                dst.put_u8(3);
                encode_date(dst, *d)?;
            }
            SqlValue::Time(t) => {
                dst.put_u8(TypeId::Time as u8);
                dst.put_u8(TIME_SCALE);
                dst.put_u8(TIME_LEN as u8);
                encode_time(dst, *t);
            }
            SqlValue::DateTime(dt) => {
                dst.put_u8(TypeId::DateTime2 as u8);
                dst.put_u8(TIME_SCALE);
                dst.put_u8((TIME_LEN + 3) as u8);
                encode_datetime2(dst, *dt)?;
            }
            SqlValue::DateTimeOffset(dto) => {
                dst.put_u8(TypeId::DateTimeOffset as u8);
                dst.put_u8(TIME_SCALE);
                dst.put_u8((TIME_LEN + 5) as u8);
                encode_datetime2(dst, dto.naive_utc())?;
                let minutes = dto.offset().local_minus_utc() / 60;
                dst.put_i16_le(minutes as i16);
            }
            SqlValue::Null | SqlValue::String(_) | SqlValue::Xml(_) => {}
        }
        Ok(())
    }

    fn param_type(&self) -> Cow<'static, str> {
        match self {
            SqlValue::Null => Cow::Borrowed("nvarchar(4000)"),
            SqlValue::Bool(_) => Cow::Borrowed("bit"),
            SqlValue::TinyInt(_) => Cow::Borrowed("tinyint"),
            SqlValue::SmallInt(_) => Cow::Borrowed("smallint"),
            SqlValue::Int(_) => Cow::Borrowed("int"),
            SqlValue::BigInt(_) => Cow::Borrowed("bigint"),
            SqlValue::Float(_) => Cow::Borrowed("real"),
            SqlValue::Double(_) => Cow::Borrowed("float"),
            SqlValue::Decimal(n) => Cow::Owned(format!("numeric({MAX_PRECISION},{})", n.scale())),
            SqlValue::String(s) | SqlValue::Xml(s) => {
                if s.encode_utf16().count() > NVARCHAR_MAX_CHARS {
                    Cow::Borrowed("nvarchar(max)")
                } else {
                    Cow::Borrowed("nvarchar(4000)")
                }
            }
            SqlValue::Binary(data) => {
                if data.len() > VARBINARY_MAX_BYTES {
                    Cow::Borrowed("varbinary(max)")
                } else {
                    Cow::Borrowed("varbinary(8000)")
                }
            }
            SqlValue::Uuid(_) => Cow::Borrowed("uniqueidentifier"),
            SqlValue::Date(_) => Cow::Borrowed("date"),
            SqlValue::Time(_) => Cow::Borrowed("time(7)"),
            SqlValue::DateTime(_) => Cow::Borrowed("datetime2(7)"),
            SqlValue::DateTimeOffset(_) => Cow::Borrowed("datetimeoffset(7)"),
        }
    }
}

/// Name of the positional parameter at zero-based `index`: `@P1`, `@P2`, ...
#[must_use]
pub fn param_name(index: usize) -> String {
    format!("@P{}", index + 1)
}

/// Declarations for positional parameters, e.g. `@P1 int,@P2 nvarchar(4000)`.
#[must_use]
pub fn param_definitions(values: &[SqlValue]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&param_name(i));
        out.push(' ');
        out.push_str(&value.param_type());
    }
    out
}

/// Encode positional parameters `@P1..@Pn` as input parameters.
pub fn encode_params(dst: &mut BytesMut, values: &[SqlValue]) -> Result<(), TypeError> {
    for (i, value) in values.iter().enumerate() {
        value.encode_param(dst, &param_name(i), ParamStatus::empty())?;
    }
    Ok(())
}

fn put_sized(dst: &mut BytesMut, type_id: TypeId, len: u8) {
    dst.put_u8(type_id as u8);
    dst.put_u8(len);
    dst.put_u8(len);
}

fn encode_decimal(dst: &mut BytesMut, n: Numeric) {
    dst.put_u8(TypeId::DecimalN as u8);
    dst.put_u8(DECIMAL_LEN);
    dst.put_u8(MAX_PRECISION);
    dst.put_u8(n.scale());
    dst.put_u8(DECIMAL_LEN);
    dst.put_u8(u8::from(n.value() >= 0));
    dst.put_slice(&n.value().unsigned_abs().to_le_bytes());
}

/// Days from 0001-01-01 to 9999-12-31, the last day a DATE can hold.
const MAX_DATE_DAYS: i32 = 3_652_058;

/// Write a DATE body: days since 0001-01-01 in three bytes.
///
/// Dates outside 0001-01-01..=9999-12-31 are rejected.
pub fn encode_date(dst: &mut BytesMut, date: NaiveDate) -> Result<(), TypeError> {
    let days = date.num_days_from_ce() - 1;
    if !(0..=MAX_DATE_DAYS).contains(&days) {
        return Err(TypeError::InvalidDateTime(format!(
            "{date} is outside 0001-01-01..=9999-12-31"
        )));
    }
    dst.put_uint_le(days as u64, 3);
    Ok(())
}

/// Write a TIME(7) body: 100ns intervals since midnight in five bytes.
pub fn encode_time(dst: &mut BytesMut, time: NaiveTime) {
    let nanos = u64::from(time.nanosecond().min(999_999_999));
    let intervals = u64::from(time.num_seconds_from_midnight()) * 10_000_000 + nanos / 100;
    dst.put_uint_le(intervals, TIME_LEN);
}

/// Write a DATETIME2(7) body: time then date.
pub fn encode_datetime2(dst: &mut BytesMut, dt: NaiveDateTime) -> Result<(), TypeError> {
    encode_time(dst, dt.time());
    encode_date(dst, dt.date())
}
