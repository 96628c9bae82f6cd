//! # mssql-types
//!
//! SQL Server data type table.
//!
//! This crate maps SQL Server wire types to Rust values: it parses column
//! TYPE_INFO, decodes row and return values, and encodes RPC parameters
//! together with their SQL declarations.
//!
//! ## Type Mappings
//!
//! | SQL Server Type | Rust Type |
//! |-----------------|-----------|
//! | `BIT` | `bool` |
//! | `TINYINT` | `u8` |
//! | `SMALLINT` | `i16` |
//! | `INT` | `i32` |
//! | `BIGINT` | `i64` |
//! | `REAL` | `f32` |
//! | `FLOAT` | `f64` |
//! | `DECIMAL`/`NUMERIC`/`MONEY` | [`Numeric`], `rust_decimal::Decimal` |
//! | `CHAR`/`VARCHAR`/`TEXT` | `String` |
//! | `NCHAR`/`NVARCHAR`/`NTEXT`/`XML` | `String` |
//! | `BINARY`/`VARBINARY`/`IMAGE` | `Vec<u8>` |
//! | `DATE` | `chrono::NaiveDate` |
//! | `TIME` | `chrono::NaiveTime` |
//! | `DATETIME`/`SMALLDATETIME`/`DATETIME2` | `chrono::NaiveDateTime` |
//! | `DATETIMEOFFSET` | `chrono::DateTime<FixedOffset>` |
//! | `UNIQUEIDENTIFIER` | `uuid::Uuid` |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod from_sql;
pub mod numeric;
pub mod to_sql;
pub mod value;

pub use decode::{TypeInfo, decode_value, read_plp};
pub use encode::{TdsEncode, encode_params, param_definitions, param_name};
pub use error::TypeError;
pub use from_sql::FromSql;
pub use numeric::Numeric;
pub use to_sql::ToSql;
pub use value::SqlValue;
