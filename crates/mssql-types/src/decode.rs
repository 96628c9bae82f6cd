//! Column metadata and value decoding.
//!
//! [`TypeInfo::decode`] reads the TYPE_INFO part of a COLMETADATA column or
//! RETURNVALUE token. [`decode_value`] reads one value described by it, as
//! found in ROW tokens and RETURNVALUE tokens.

use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tds_protocol::codec::{
    decode_utf16_bytes, ensure, read_b_varchar, read_bytes, read_u8, read_u16_le, read_u32_le,
    read_u64_le, read_us_varchar, skip,
};
use tds_protocol::rpc::PLP_NULL;
use tds_protocol::{Collation, TypeId};
use uuid::Uuid;

use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::SqlValue;

/// Length value that marks a `(max)` column using PLP encoding.
pub const MAX_LENGTH_MARKER: u32 = 0xFFFF;

const USHORT_NULL: u16 = 0xFFFF;
const BYTE_NULL: u8 = 0xFF;
const TIMESTAMP_LEN: usize = 8;

/// Type information for one column or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Wire data type.
    pub type_id: TypeId,
    /// Declared maximum length in bytes, or the fixed size.
    pub length: u32,
    /// Precision for DECIMAL/NUMERIC.
    pub precision: u8,
    /// Scale for DECIMAL/NUMERIC and the TIME family.
    pub scale: u8,
    /// Collation for character types.
    pub collation: Option<Collation>,
}

impl TypeInfo {
    /// Type info for a fixed-length type.
    #[must_use]
    pub fn fixed(type_id: TypeId) -> Self {
        Self {
            type_id,
            length: type_id.fixed_size().map_or(0, |n| n as u32),
            precision: 0,
            scale: 0,
            collation: None,
        }
    }

    /// Type info for a nullable fixed-width type such as INTN with the given length.
    #[must_use]
    pub fn sized(type_id: TypeId, length: u32) -> Self {
        Self {
            length,
            ..Self::fixed(type_id)
        }
    }

    /// Type info for `nvarchar(n)`; `None` means `nvarchar(max)`.
    #[must_use]
    pub fn nvarchar(chars: Option<u32>) -> Self {
        Self {
            collation: Some(Collation::default()),
            ..Self::sized(TypeId::NVarChar, chars.map_or(MAX_LENGTH_MARKER, |c| c * 2))
        }
    }

    /// Type info for DECIMALN with precision and scale.
    #[must_use]
    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self {
            precision,
            scale,
            ..Self::sized(TypeId::DecimalN, 17)
        }
    }

    /// Type info for the TIME family with a fractional scale.
    #[must_use]
    pub fn scaled(type_id: TypeId, scale: u8) -> Self {
        Self {
            scale,
            ..Self::fixed(type_id)
        }
    }

    /// Read TYPE_INFO: the type byte followed by its type-specific metadata.
    pub fn decode(src: &mut Bytes) -> Result<Self, TypeError> {
        let type_id = TypeId::from_u8(read_u8(src)?)?;
        let mut info = Self::fixed(type_id);

        match type_id {
            TypeId::Null
            | TypeId::Int1
            | TypeId::Bit
            | TypeId::Int2
            | TypeId::Int4
            | TypeId::Int8
            | TypeId::Float4
            | TypeId::Float8
            | TypeId::Money
            | TypeId::Money4
            | TypeId::DateTime
            | TypeId::DateTime4
            | TypeId::Date => {}
            TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN
            | TypeId::Guid => {
                info.length = u32::from(read_u8(src)?);
            }
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                info.length = u32::from(read_u8(src)?);
                info.precision = read_u8(src)?;
                info.scale = read_u8(src)?;
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                info.scale = read_u8(src)?;
                if info.scale > 7 {
                    return Err(TypeError::InvalidDateTime(format!(
                        "fractional scale {} exceeds 7",
                        info.scale
                    )));
                }
            }
            TypeId::Char | TypeId::VarChar => {
                info.length = u32::from(read_u8(src)?);
                info.collation = Some(Collation::decode(src)?);
            }
            TypeId::Binary | TypeId::VarBinary => {
                info.length = u32::from(read_u8(src)?);
            }
            TypeId::BigChar | TypeId::BigVarChar | TypeId::NChar | TypeId::NVarChar => {
                info.length = u32::from(read_u16_le(src)?);
                info.collation = Some(Collation::decode(src)?);
            }
            TypeId::BigBinary | TypeId::BigVarBinary => {
                info.length = u32::from(read_u16_le(src)?);
            }
            TypeId::Text | TypeId::NText => {
                info.length = read_u32_le(src)?;
                info.collation = Some(Collation::decode(src)?);
                skip_table_name(src)?;
            }
            TypeId::Image => {
                info.length = read_u32_le(src)?;
                skip_table_name(src)?;
            }
            TypeId::Xml => {
                let schema_present = read_u8(src)?;
                if schema_present != 0 {
                    read_b_varchar(src)?;
                    read_b_varchar(src)?;
                    read_us_varchar(src)?;
                }
            }
        }

        Ok(info)
    }

    /// Check if values of this type are sent as partially length-prefixed chunks.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        match self.type_id {
            TypeId::Xml => true,
            TypeId::BigVarChar | TypeId::NVarChar | TypeId::BigVarBinary => {
                self.length == MAX_LENGTH_MARKER
            }
            _ => false,
        }
    }

    /// SQL type name as a declaration, e.g. `nvarchar(50)` or `decimal(18,2)`.
    #[must_use]
    pub fn sql_type_name(&self) -> String {
        let len = |chars: u32| {
            if self.length == MAX_LENGTH_MARKER {
                "max".to_string()
            } else {
                chars.to_string()
            }
        };
        match self.type_id {
            TypeId::Null => "null".into(),
            TypeId::Int1 => "tinyint".into(),
            TypeId::Bit | TypeId::BitN => "bit".into(),
            TypeId::Int2 => "smallint".into(),
            TypeId::Int4 => "int".into(),
            TypeId::Int8 => "bigint".into(),
            TypeId::IntN => match self.length {
                1 => "tinyint".into(),
                2 => "smallint".into(),
                8 => "bigint".into(),
                _ => "int".into(),
            },
            TypeId::Float4 => "real".into(),
            TypeId::Float8 => "float".into(),
            TypeId::FloatN => {
                if self.length == 4 {
                    "real".into()
                } else {
                    "float".into()
                }
            }
            TypeId::Money => "money".into(),
            TypeId::Money4 => "smallmoney".into(),
            TypeId::MoneyN => {
                if self.length == 4 {
                    "smallmoney".into()
                } else {
                    "money".into()
                }
            }
            TypeId::DateTime => "datetime".into(),
            TypeId::DateTime4 => "smalldatetime".into(),
            TypeId::DateTimeN => {
                if self.length == 4 {
                    "smalldatetime".into()
                } else {
                    "datetime".into()
                }
            }
            TypeId::Guid => "uniqueidentifier".into(),
            TypeId::Decimal | TypeId::DecimalN => {
                format!("decimal({},{})", self.precision, self.scale)
            }
            TypeId::Numeric | TypeId::NumericN => {
                format!("numeric({},{})", self.precision, self.scale)
            }
            TypeId::Char | TypeId::BigChar => format!("char({})", self.length),
            TypeId::VarChar | TypeId::BigVarChar => format!("varchar({})", len(self.length)),
            TypeId::NChar => format!("nchar({})", self.length / 2),
            TypeId::NVarChar => format!("nvarchar({})", len(self.length / 2)),
            TypeId::Binary | TypeId::BigBinary => format!("binary({})", self.length),
            TypeId::VarBinary | TypeId::BigVarBinary => {
                format!("varbinary({})", len(self.length))
            }
            TypeId::Text => "text".into(),
            TypeId::NText => "ntext".into(),
            TypeId::Image => "image".into(),
            TypeId::Date => "date".into(),
            TypeId::Time => format!("time({})", self.scale),
            TypeId::DateTime2 => format!("datetime2({})", self.scale),
            TypeId::DateTimeOffset => format!("datetimeoffset({})", self.scale),
            TypeId::Xml => "xml".into(),
        }
    }
}

fn skip_table_name(src: &mut Bytes) -> Result<(), TypeError> {
    let parts = read_u8(src)?;
    for _ in 0..parts {
        read_us_varchar(src)?;
    }
    Ok(())
}

/// Decode one value of the given type.
pub fn decode_value(src: &mut Bytes, info: &TypeInfo) -> Result<SqlValue, TypeError> {
    match info.type_id {
        TypeId::Null => Ok(SqlValue::Null),
        TypeId::Int1
        | TypeId::Bit
        | TypeId::Int2
        | TypeId::Int4
        | TypeId::Int8
        | TypeId::Float4
        | TypeId::Float8
        | TypeId::Money
        | TypeId::Money4
        | TypeId::DateTime
        | TypeId::DateTime4 => decode_fixed(src, info.type_id),
        TypeId::IntN => {
            let fixed = match read_u8(src)? {
                0 => return Ok(SqlValue::Null),
                1 => TypeId::Int1,
                2 => TypeId::Int2,
                4 => TypeId::Int4,
                8 => TypeId::Int8,
                n => return Err(invalid_length("INTN", n)),
            };
            decode_fixed(src, fixed)
        }
        TypeId::BitN => match read_u8(src)? {
            0 => Ok(SqlValue::Null),
            1 => decode_fixed(src, TypeId::Bit),
            n => Err(invalid_length("BITN", n)),
        },
        TypeId::FloatN => match read_u8(src)? {
            0 => Ok(SqlValue::Null),
            4 => decode_fixed(src, TypeId::Float4),
            8 => decode_fixed(src, TypeId::Float8),
            n => Err(invalid_length("FLTN", n)),
        },
        TypeId::MoneyN => match read_u8(src)? {
            0 => Ok(SqlValue::Null),
            4 => decode_fixed(src, TypeId::Money4),
            8 => decode_fixed(src, TypeId::Money),
            n => Err(invalid_length("MONEYN", n)),
        },
        TypeId::DateTimeN => match read_u8(src)? {
            0 => Ok(SqlValue::Null),
            4 => decode_fixed(src, TypeId::DateTime4),
            8 => decode_fixed(src, TypeId::DateTime),
            n => Err(invalid_length("DATETIMN", n)),
        },
        TypeId::Guid => match read_u8(src)? {
            0 => Ok(SqlValue::Null),
            16 => {
                let raw = read_bytes(src, 16)?;
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&raw);
                Ok(SqlValue::Uuid(Uuid::from_bytes_le(bytes)))
            }
            n => Err(invalid_length("UNIQUEIDENTIFIER", n)),
        },
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            decode_decimal(src, info.scale)
        }
        TypeId::Date => match read_u8(src)? {
            0 => Ok(SqlValue::Null),
            3 => Ok(SqlValue::Date(decode_date(src)?)),
            n => Err(invalid_length("DATE", n)),
        },
        TypeId::Time => {
            let len = read_u8(src)?;
            if len == 0 {
                return Ok(SqlValue::Null);
            }
            let time_len = time_bytes_for_scale(info.scale);
            if usize::from(len) != time_len {
                return Err(invalid_length("TIME", len));
            }
            Ok(SqlValue::Time(decode_time(src, info.scale)?))
        }
        TypeId::DateTime2 => {
            let len = read_u8(src)?;
            if len == 0 {
                return Ok(SqlValue::Null);
            }
            if usize::from(len) != time_bytes_for_scale(info.scale) + 3 {
                return Err(invalid_length("DATETIME2", len));
            }
            let time = decode_time(src, info.scale)?;
            let date = decode_date(src)?;
            Ok(SqlValue::DateTime(NaiveDateTime::new(date, time)))
        }
        TypeId::DateTimeOffset => {
            let len = read_u8(src)?;
            if len == 0 {
                return Ok(SqlValue::Null);
            }
            if usize::from(len) != time_bytes_for_scale(info.scale) + 5 {
                return Err(invalid_length("DATETIMEOFFSET", len));
            }
            let time = decode_time(src, info.scale)?;
            let date = decode_date(src)?;
            let offset_minutes = read_u16_le(src)? as i16;
            let offset = FixedOffset::east_opt(i32::from(offset_minutes) * 60).ok_or_else(|| {
                TypeError::InvalidDateTime(format!("offset {offset_minutes} minutes"))
            })?;
            let utc = NaiveDateTime::new(date, time);
            Ok(SqlValue::DateTimeOffset(DateTime::from_naive_utc_and_offset(
                utc, offset,
            )))
        }
        TypeId::BigChar | TypeId::BigVarChar | TypeId::NChar | TypeId::NVarChar => {
            match read_ushort_or_plp(src, info)? {
                None => Ok(SqlValue::Null),
                Some(data) => Ok(SqlValue::String(decode_string(&data, info)?)),
            }
        }
        TypeId::BigBinary | TypeId::BigVarBinary => match read_ushort_or_plp(src, info)? {
            None => Ok(SqlValue::Null),
            Some(data) => Ok(SqlValue::Binary(data)),
        },
        TypeId::Char | TypeId::VarChar => match read_byte_len(src)? {
            None => Ok(SqlValue::Null),
            Some(data) => Ok(SqlValue::String(decode_string(&data, info)?)),
        },
        TypeId::Binary | TypeId::VarBinary => match read_byte_len(src)? {
            None => Ok(SqlValue::Null),
            Some(data) => Ok(SqlValue::Binary(data)),
        },
        TypeId::Text | TypeId::NText => match read_text_pointer_value(src)? {
            None => Ok(SqlValue::Null),
            Some(data) => Ok(SqlValue::String(decode_string(&data, info)?)),
        },
        TypeId::Image => match read_text_pointer_value(src)? {
            None => Ok(SqlValue::Null),
            Some(data) => Ok(SqlValue::Binary(data)),
        },
        TypeId::Xml => match read_plp(src)? {
            None => Ok(SqlValue::Null),
            Some(data) => Ok(SqlValue::Xml(decode_utf16_bytes(&data)?)),
        },
    }
}

fn decode_fixed(src: &mut Bytes, type_id: TypeId) -> Result<SqlValue, TypeError> {
    let size = type_id.fixed_size().unwrap_or(0);
    ensure(src, size)?;
    let value = match type_id {
        TypeId::Int1 => SqlValue::TinyInt(src.get_u8()),
        TypeId::Bit => SqlValue::Bool(src.get_u8() != 0),
        TypeId::Int2 => SqlValue::SmallInt(src.get_i16_le()),
        TypeId::Int4 => SqlValue::Int(src.get_i32_le()),
        TypeId::Int8 => SqlValue::BigInt(src.get_i64_le()),
        TypeId::Float4 => SqlValue::Float(src.get_f32_le()),
        TypeId::Float8 => SqlValue::Double(src.get_f64_le()),
        TypeId::Money => {
            let high = i64::from(src.get_i32_le());
            let low = i64::from(src.get_u32_le());
            SqlValue::Decimal(Numeric::new(i128::from((high << 32) | low), 4)?)
        }
        TypeId::Money4 => SqlValue::Decimal(Numeric::new(i128::from(src.get_i32_le()), 4)?),
        TypeId::DateTime => {
            let days = src.get_i32_le();
            let ticks = src.get_u32_le();
            SqlValue::DateTime(decode_datetime(days, ticks)?)
        }
        TypeId::DateTime4 => {
            let days = src.get_u16_le();
            let minutes = src.get_u16_le();
            SqlValue::DateTime(decode_smalldatetime(days, minutes)?)
        }
        other => return Err(TypeError::UnsupportedType(other as u8)),
    };
    Ok(value)
}

fn invalid_length(type_name: &'static str, length: u8) -> TypeError {
    TypeError::InvalidLength {
        type_name,
        length: usize::from(length),
    }
}

fn decode_decimal(src: &mut Bytes, scale: u8) -> Result<SqlValue, TypeError> {
    let len = usize::from(read_u8(src)?);
    if len == 0 {
        return Ok(SqlValue::Null);
    }
    if len > 17 {
        return Err(TypeError::InvalidLength {
            type_name: "DECIMAL",
            length: len,
        });
    }
    let positive = read_u8(src)? == 1;
    let magnitude = read_bytes(src, len - 1)?;

    let mut raw = [0u8; 16];
    raw[..magnitude.len()].copy_from_slice(&magnitude);
    let unsigned = u128::from_le_bytes(raw);
    let value = i128::try_from(unsigned)
        .map_err(|_| TypeError::InvalidDecimal("magnitude exceeds 38 digits".into()))?;

    let value = if positive { value } else { -value };
    Ok(SqlValue::Decimal(Numeric::new(value, scale)?))
}

/// Bytes used by the time part at a given fractional scale.
#[must_use]
pub fn time_bytes_for_scale(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

fn decode_date(src: &mut Bytes) -> Result<NaiveDate, TypeError> {
    ensure(src, 3)?;
    let days = src.get_uint_le(3) as i32;
    NaiveDate::from_num_days_from_ce_opt(days + 1)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{days} days from 0001-01-01")))
}

fn decode_time(src: &mut Bytes, scale: u8) -> Result<NaiveTime, TypeError> {
    let len = time_bytes_for_scale(scale);
    ensure(src, len)?;
    let intervals = src.get_uint_le(len);
    intervals_to_time(intervals, scale)
}

/// Convert intervals of `10^-scale` seconds since midnight to a time of day.
pub fn intervals_to_time(intervals: u64, scale: u8) -> Result<NaiveTime, TypeError> {
    let nanos = intervals
        .checked_mul(10u64.pow(9 - u32::from(scale.min(7))))
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{intervals} time intervals")))?;
    let secs = (nanos / 1_000_000_000) as u32;
    let nano_part = (nanos % 1_000_000_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nano_part)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{intervals} time intervals")))
}

fn datetime_epoch() -> Result<NaiveDate, TypeError> {
    NaiveDate::from_ymd_opt(1900, 1, 1).ok_or_else(|| TypeError::InvalidDateTime("epoch".into()))
}

/// DATETIME: days since 1900-01-01 and 1/300 second ticks, rounded to milliseconds.
fn decode_datetime(days: i32, ticks: u32) -> Result<NaiveDateTime, TypeError> {
    let date = datetime_epoch()?
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{days} days from 1900-01-01")))?;
    let millis = (u64::from(ticks) * 10 + 1) / 3;
    let time = intervals_to_time(millis, 3)?;
    Ok(NaiveDateTime::new(date, time))
}

fn decode_smalldatetime(days: u16, minutes: u16) -> Result<NaiveDateTime, TypeError> {
    let date = datetime_epoch()?
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{days} days from 1900-01-01")))?;
    let time = intervals_to_time(u64::from(minutes) * 60, 0)?;
    Ok(NaiveDateTime::new(date, time))
}

fn decode_string(data: &[u8], info: &TypeInfo) -> Result<String, TypeError> {
    if info.type_id.is_unicode() {
        return Ok(decode_utf16_bytes(data)?);
    }
    let collation = info.collation.unwrap_or_default();
    Ok(collation.decode_str(data))
}

fn read_ushort_or_plp(src: &mut Bytes, info: &TypeInfo) -> Result<Option<Bytes>, TypeError> {
    if info.is_plp() {
        return read_plp(src);
    }
    let len = read_u16_le(src)?;
    if len == USHORT_NULL {
        return Ok(None);
    }
    Ok(Some(read_bytes(src, usize::from(len))?))
}

fn read_byte_len(src: &mut Bytes) -> Result<Option<Bytes>, TypeError> {
    let len = read_u8(src)?;
    if len == BYTE_NULL {
        return Ok(None);
    }
    Ok(Some(read_bytes(src, usize::from(len))?))
}

fn read_text_pointer_value(src: &mut Bytes) -> Result<Option<Bytes>, TypeError> {
    let pointer_len = read_u8(src)?;
    if pointer_len == 0 {
        return Ok(None);
    }
    skip(src, usize::from(pointer_len) + TIMESTAMP_LEN)?;
    let len = read_u32_le(src)? as usize;
    Ok(Some(read_bytes(src, len)?))
}

/// Read a PLP value: a u64 total length, then chunks until a zero-length one.
///
/// Returns `None` for the PLP NULL marker. The total may be the "unknown"
/// marker, so only the chunks are trusted.
pub fn read_plp(src: &mut Bytes) -> Result<Option<Bytes>, TypeError> {
    let total = read_u64_le(src)?;
    if total == PLP_NULL {
        return Ok(None);
    }
    let mut out = BytesMut::new();
    loop {
        let chunk_len = read_u32_le(src)? as usize;
        if chunk_len == 0 {
            break;
        }
        out.extend_from_slice(&read_bytes(src, chunk_len)?);
    }
    Ok(Some(out.freeze()))
}
