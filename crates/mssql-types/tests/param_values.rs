//! Parameter encoding checked against the value decoder.
//!
//! A parameter's TYPE_INFO and value use the same layout as a RETURNVALUE
//! token, so every encoded parameter must decode back to the value it came
//! from.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::{Bytes, BytesMut};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use mssql_types::{
    FromSql, Numeric, SqlValue, TdsEncode, ToSql, TypeError, TypeInfo, decode_value,
    param_definitions,
};
use proptest::prelude::*;
use tds_protocol::ParamStatus;
use uuid::Uuid;

fn encode_then_decode(value: &SqlValue) -> SqlValue {
    let mut buf = BytesMut::new();
    value
        .encode_param(&mut buf, "@P1", ParamStatus::BY_REF)
        .unwrap();
    let mut bytes: Bytes = buf.freeze();
    // B_VARCHAR name "@P1" and the status byte
    let _ = bytes.split_to(1 + 3 * 2 + 1);
    let info = TypeInfo::decode(&mut bytes).unwrap();
    let decoded = decode_value(&mut bytes, &info).unwrap();
    assert!(bytes.is_empty(), "trailing bytes after {value:?}");
    decoded
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    // 0001-01-01 ..= 9999-12-31
    (1i32..=3_652_059).prop_map(|d| NaiveDate::from_num_days_from_ce_opt(d).unwrap())
}

fn arb_time() -> impl Strategy<Value = NaiveTime> {
    // 100ns resolution survives TIME(7)
    (0u32..86_400, 0u32..10_000_000).prop_map(|(s, ticks)| {
        NaiveTime::from_num_seconds_from_midnight_opt(s, ticks * 100).unwrap()
    })
}

fn arb_numeric() -> impl Strategy<Value = Numeric> {
    let max = 10i128.pow(38) - 1;
    (-max..=max, 0u8..=38).prop_map(|(v, s)| Numeric::new(v, s).unwrap())
}

fn arb_value() -> impl Strategy<Value = SqlValue> {
    prop_oneof![
        Just(SqlValue::Null),
        any::<bool>().prop_map(SqlValue::Bool),
        any::<u8>().prop_map(SqlValue::TinyInt),
        any::<i16>().prop_map(SqlValue::SmallInt),
        any::<i32>().prop_map(SqlValue::Int),
        any::<i64>().prop_map(SqlValue::BigInt),
        any::<f32>()
            .prop_filter("NaN never compares equal", |f| !f.is_nan())
            .prop_map(SqlValue::Float),
        any::<f64>()
            .prop_filter("NaN never compares equal", |f| !f.is_nan())
            .prop_map(SqlValue::Double),
        arb_numeric().prop_map(SqlValue::Decimal),
        ".{0,64}".prop_map(SqlValue::String),
        proptest::collection::vec(any::<u8>(), 0..256)
            .prop_map(|v| SqlValue::Binary(Bytes::from(v))),
        any::<[u8; 16]>().prop_map(|b| SqlValue::Uuid(Uuid::from_bytes(b))),
        arb_date().prop_map(SqlValue::Date),
        arb_time().prop_map(SqlValue::Time),
        (arb_date(), arb_time())
            .prop_map(|(d, t)| SqlValue::DateTime(NaiveDateTime::new(d, t))),
    ]
}

proptest! {
    #[test]
    fn prop_param_decodes_to_same_value(value in arb_value()) {
        prop_assert_eq!(encode_then_decode(&value), value);
    }

    #[test]
    fn prop_definitions_name_every_param(values in proptest::collection::vec(arb_value(), 1..8)) {
        let defs = param_definitions(&values);
        prop_assert_eq!(defs.split(',').count(), values.len());
        for (i, def) in defs.split(',').enumerate() {
            let prefix = format!("@P{} ", i + 1);
            prop_assert!(def.starts_with(&prefix));
        }
    }
}

// ============================================================================
// Edge cases
// ============================================================================

#[test]
fn test_datetimeoffset_keeps_instant() {
    let offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
    let dto = offset.with_ymd_and_hms(2000, 1, 1, 0, 15, 0).unwrap();
    let value = SqlValue::DateTimeOffset(dto);
    let SqlValue::DateTimeOffset(back) = encode_then_decode(&value) else {
        unreachable!("expected datetimeoffset");
    };
    assert_eq!(back, dto);
    assert_eq!(back.offset().local_minus_utc(), dto.offset().local_minus_utc());
}

#[test]
fn test_supplementary_plane_string() {
    let value = SqlValue::String("emoji \u{1F600} and \u{4E2D}\u{6587}".into());
    assert_eq!(encode_then_decode(&value), value);
}

#[test]
fn test_string_at_nvarchar_limit() {
    let at_limit = SqlValue::String("a".repeat(4000));
    assert_eq!(at_limit.param_type(), "nvarchar(4000)");
    assert_eq!(encode_then_decode(&at_limit), at_limit);

    // a surrogate pair counts as two UTF-16 units
    let over = SqlValue::String(format!("{}\u{1F600}", "a".repeat(3999)));
    assert_eq!(over.param_type(), "nvarchar(max)");
    assert_eq!(encode_then_decode(&over), over);
}

#[test]
fn test_max_precision_decimal() {
    let n = Numeric::new(-(10i128.pow(38) - 1), 10).unwrap();
    let value = SqlValue::Decimal(n);
    assert_eq!(encode_then_decode(&value), value);
    assert_eq!(n.to_string(), "-9999999999999999999999999999.9999999999");
}

#[test]
fn test_null_round_trip() {
    assert_eq!(encode_then_decode(&SqlValue::Null), SqlValue::Null);
}

// ============================================================================
// Conversions
// ============================================================================

#[test]
fn test_option_conversions() {
    let none: Option<i32> = None;
    assert!(none.to_sql().unwrap().is_null());
    assert_eq!(Option::<i32>::from_sql(&SqlValue::Null).unwrap(), None);
    assert!(matches!(
        i32::from_sql(&SqlValue::Null),
        Err(TypeError::UnexpectedNull)
    ));
}

#[test]
fn test_widening_conversions() {
    assert_eq!(i64::from_sql(&SqlValue::TinyInt(255)).unwrap(), 255);
    assert_eq!(i32::from_sql(&SqlValue::SmallInt(-7)).unwrap(), -7);
    assert!(matches!(
        i32::from_sql(&SqlValue::String("1".into())),
        Err(TypeError::TypeMismatch { .. })
    ));
}

#[test]
fn test_uuid_from_wire_bytes() {
    let id = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
    let raw = SqlValue::Binary(Bytes::copy_from_slice(&id.to_bytes_le()));
    assert_eq!(Uuid::from_sql(&raw).unwrap(), id);
}
