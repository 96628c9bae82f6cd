//! Builders for server-side token streams.
//!
//! [`TokenStream`] writes the tokens a server would send in a tabular
//! result so decoder and command tests can script responses byte for byte.
//!
//! ```rust,ignore
//! use mssql_testing::tokens::{MockColumn, ScalarValue, TokenStream};
//! use tds_protocol::DoneStatus;
//!
//! let payload = TokenStream::new()
//!     .col_metadata(&[MockColumn::int("id")])
//!     .row(&[ScalarValue::Int(1)])
//!     .done(DoneStatus::COUNT, 1)
//!     .build();
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::codec::write_b_varchar;
use tds_protocol::rpc::DEFAULT_COLLATION;
use tds_protocol::types::TypeId;
use tds_protocol::{
    ColumnFlags, Done, DoneStatus, EnvChange, LoginAck, ProtocolError, ServerMessage, TdsVersion,
    TokenType,
};

/// `cur_cmd` reported in DONE tokens (SELECT).
const CUR_CMD_SELECT: u16 = 0xC1;

/// Scalar value for mock rows.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String value.
    String(String),
    /// Binary data.
    Binary(Vec<u8>),
}

impl ScalarValue {
    /// The column a value of this kind would naturally be sent in.
    #[must_use]
    pub fn column(&self, name: impl Into<String>) -> MockColumn {
        match self {
            Self::Null | Self::Int(_) => MockColumn::int(name),
            Self::Bool(_) => MockColumn::bit(name),
            Self::BigInt(_) => MockColumn::bigint(name),
            Self::Float(_) => MockColumn::new(name, TypeId::FloatN).with_max_length(4),
            Self::Double(_) => MockColumn::float(name),
            Self::String(_) => MockColumn::nvarchar(name, 4000),
            Self::Binary(_) => MockColumn::varbinary(name, 8000),
        }
    }

    /// Encode this value as row data for `column`.
    ///
    /// NULL needs the column to pick between the one-byte and the
    /// two-byte length form; without one the one-byte form is used.
    pub fn encode(&self, column: Option<&MockColumn>, dst: &mut BytesMut) {
        match self {
            Self::Null => {
                if column.is_some_and(MockColumn::has_u16_length) {
                    dst.put_u16_le(0xFFFF);
                } else {
                    dst.put_u8(0);
                }
            }
            Self::Bool(v) => {
                dst.put_u8(1);
                dst.put_u8(u8::from(*v));
            }
            Self::Int(v) => {
                dst.put_u8(4);
                dst.put_i32_le(*v);
            }
            Self::BigInt(v) => {
                dst.put_u8(8);
                dst.put_i64_le(*v);
            }
            Self::Float(v) => {
                dst.put_u8(4);
                dst.put_f32_le(*v);
            }
            Self::Double(v) => {
                dst.put_u8(8);
                dst.put_f64_le(*v);
            }
            Self::String(s) => {
                let utf16: Vec<u16> = s.encode_utf16().collect();
                dst.put_u16_le((utf16.len() * 2) as u16);
                for c in utf16 {
                    dst.put_u16_le(c);
                }
            }
            Self::Binary(data) => {
                dst.put_u16_le(data.len() as u16);
                dst.extend_from_slice(data);
            }
        }
    }
}

/// Mock column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Column type.
    pub type_id: TypeId,
    /// Maximum length in bytes (for variable-length types).
    pub max_length: Option<u32>,
    /// Whether the column is nullable.
    pub nullable: bool,
}

impl MockColumn {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            name: name.into(),
            type_id,
            max_length: None,
            nullable: true,
        }
    }

    /// Create an INT column.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN).with_max_length(4)
    }

    /// Create a BIGINT column.
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN).with_max_length(8)
    }

    /// Create a BIT column.
    pub fn bit(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::BitN).with_max_length(1)
    }

    /// Create a FLOAT column.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::FloatN).with_max_length(8)
    }

    /// Create an NVARCHAR column of `max_len` characters.
    pub fn nvarchar(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, TypeId::NVarChar).with_max_length(max_len * 2)
    }

    /// Create a VARBINARY column of `max_len` bytes.
    pub fn varbinary(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, TypeId::BigVarBinary).with_max_length(max_len)
    }

    /// Set the maximum length.
    #[must_use]
    pub fn with_max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Set nullable flag.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    fn is_character(&self) -> bool {
        matches!(
            self.type_id,
            TypeId::NVarChar | TypeId::NChar | TypeId::BigVarChar | TypeId::BigChar
        )
    }

    fn has_u16_length(&self) -> bool {
        self.is_character() || matches!(self.type_id, TypeId::BigVarBinary | TypeId::BigBinary)
    }

    /// Write the TYPE_INFO of this column.
    pub fn encode_type_info(&self, dst: &mut BytesMut) {
        dst.put_u8(self.type_id as u8);
        match self.type_id {
            TypeId::IntN | TypeId::BitN | TypeId::FloatN | TypeId::MoneyN | TypeId::DateTimeN => {
                dst.put_u8(self.max_length.unwrap_or(4) as u8);
            }
            _ if self.has_u16_length() => {
                dst.put_u16_le(self.max_length.unwrap_or(8000) as u16);
                if self.is_character() {
                    dst.put_slice(&DEFAULT_COLLATION);
                }
            }
            _ => {}
        }
    }

    fn encode_metadata(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.put_u32_le(0); // user type
        let flags = if self.nullable {
            ColumnFlags::NULLABLE
        } else {
            ColumnFlags::empty()
        };
        dst.put_u16_le(flags.bits());
        self.encode_type_info(dst);
        write_b_varchar(dst, &self.name)
    }
}

/// Builder for a tabular result payload.
#[derive(Debug, Default)]
pub struct TokenStream {
    buf: BytesMut,
    columns: Vec<MockColumn>,
    error: Option<ProtocolError>,
}

impl TokenStream {
    /// Start an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, result: Result<(), ProtocolError>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    /// COLMETADATA describing `columns`; later rows are encoded against them.
    #[must_use]
    pub fn col_metadata(mut self, columns: &[MockColumn]) -> Self {
        self.buf.put_u8(TokenType::ColMetaData as u8);
        self.buf.put_u16_le(columns.len() as u16);
        for column in columns {
            let result = column.encode_metadata(&mut self.buf);
            self.record(result);
        }
        self.columns = columns.to_vec();
        self
    }

    /// The "no metadata" COLMETADATA a cursor fetch sends.
    #[must_use]
    pub fn no_metadata(mut self) -> Self {
        self.buf.put_u8(TokenType::ColMetaData as u8);
        self.buf.put_u16_le(0xFFFF);
        self
    }

    /// Declare the columns of rows that follow without writing metadata.
    #[must_use]
    pub fn with_columns(mut self, columns: &[MockColumn]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    /// ROW token.
    #[must_use]
    pub fn row(mut self, values: &[ScalarValue]) -> Self {
        self.buf.put_u8(TokenType::Row as u8);
        for (i, value) in values.iter().enumerate() {
            value.encode(self.columns.get(i), &mut self.buf);
        }
        self
    }

    /// NBCROW token; NULL values are carried by the bitmap only.
    #[must_use]
    pub fn nbc_row(mut self, values: &[ScalarValue]) -> Self {
        self.buf.put_u8(TokenType::NbcRow as u8);
        let mut bitmap = vec![0u8; values.len().div_ceil(8)];
        for (i, value) in values.iter().enumerate() {
            if *value == ScalarValue::Null {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        self.buf.put_slice(&bitmap);
        for (i, value) in values.iter().enumerate() {
            if *value != ScalarValue::Null {
                value.encode(self.columns.get(i), &mut self.buf);
            }
        }
        self
    }

    fn done_token(mut self, token_type: TokenType, status: DoneStatus, row_count: u64) -> Self {
        Done {
            status,
            cur_cmd: CUR_CMD_SELECT,
            row_count,
        }
        .encode(token_type, &mut self.buf);
        self
    }

    /// DONE token.
    #[must_use]
    pub fn done(self, status: DoneStatus, row_count: u64) -> Self {
        self.done_token(TokenType::Done, status, row_count)
    }

    /// DONEPROC token.
    #[must_use]
    pub fn done_proc(self, status: DoneStatus, row_count: u64) -> Self {
        self.done_token(TokenType::DoneProc, status, row_count)
    }

    /// DONEINPROC token.
    #[must_use]
    pub fn done_in_proc(self, status: DoneStatus, row_count: u64) -> Self {
        self.done_token(TokenType::DoneInProc, status, row_count)
    }

    fn message(mut self, token_type: TokenType, number: i32, class: u8, text: &str) -> Self {
        let message = ServerMessage {
            number,
            state: 1,
            class,
            message: text.to_string(),
            server: "mock".to_string(),
            procedure: String::new(),
            line: 1,
        };
        let result = message.encode(token_type, &mut self.buf);
        self.record(result);
        self
    }

    /// ERROR token.
    #[must_use]
    pub fn error(self, number: i32, class: u8, message: &str) -> Self {
        self.message(TokenType::Error, number, class, message)
    }

    /// INFO token.
    #[must_use]
    pub fn info(self, number: i32, class: u8, message: &str) -> Self {
        self.message(TokenType::Info, number, class, message)
    }

    /// RETURNVALUE token for an INT output parameter.
    #[must_use]
    pub fn return_value_int(mut self, ordinal: u16, value: Option<i32>) -> Self {
        self.buf.put_u8(TokenType::ReturnValue as u8);
        self.buf.put_u16_le(ordinal);
        self.buf.put_u8(0); // unnamed
        self.buf.put_u8(1); // output parameter
        self.buf.put_u32_le(0);
        self.buf.put_u16_le(ColumnFlags::NULLABLE.bits());
        self.buf.put_u8(TypeId::IntN as u8);
        self.buf.put_u8(4);
        match value {
            Some(v) => ScalarValue::Int(v).encode(None, &mut self.buf),
            None => self.buf.put_u8(0),
        }
        self
    }

    /// RETURNSTATUS token.
    #[must_use]
    pub fn return_status(mut self, status: i32) -> Self {
        self.buf.put_u8(TokenType::ReturnStatus as u8);
        self.buf.put_i32_le(status);
        self
    }

    /// ENVCHANGE token.
    #[must_use]
    pub fn env_change(mut self, change: &EnvChange) -> Self {
        let result = change.encode(&mut self.buf);
        self.record(result);
        self
    }

    /// LOGINACK token for TDS 7.4.
    #[must_use]
    pub fn login_ack(mut self, prog_name: &str) -> Self {
        let ack = LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4,
            prog_name: prog_name.to_string(),
            prog_version: 0x1000_0000,
        };
        let result = ack.encode(&mut self.buf);
        self.record(result);
        self
    }

    /// ORDER token.
    #[must_use]
    pub fn order(mut self, columns: &[u16]) -> Self {
        self.buf.put_u8(TokenType::Order as u8);
        self.buf.put_u16_le((columns.len() * 2) as u16);
        for column in columns {
            self.buf.put_u16_le(*column);
        }
        self
    }

    /// Append raw bytes.
    #[must_use]
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Finish the stream, reporting the first encoding failure.
    pub fn try_build(self) -> Result<Bytes, ProtocolError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.buf.freeze()),
        }
    }

    /// Finish the stream.
    ///
    /// # Panics
    ///
    /// Panics if a string did not fit its length prefix.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn build(self) -> Bytes {
        match self.try_build() {
            Ok(bytes) => bytes,
            Err(e) => panic!("invalid token stream: {e}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_row_null_follows_column_length_form() {
        let payload = TokenStream::new()
            .with_columns(&[MockColumn::int("a"), MockColumn::nvarchar("b", 4)])
            .row(&[ScalarValue::Null, ScalarValue::Null])
            .build();
        assert_eq!(&payload[..], &[0xD1, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn test_nbc_row_bitmap() {
        let payload = TokenStream::new()
            .with_columns(&[MockColumn::int("a"), MockColumn::int("b")])
            .nbc_row(&[ScalarValue::Null, ScalarValue::Int(7)])
            .build();
        assert_eq!(&payload[..], &[0xD2, 0b01, 4, 7, 0, 0, 0]);
    }

    #[test]
    fn test_no_metadata_marker() {
        let payload = TokenStream::new().no_metadata().build();
        assert_eq!(&payload[..], &[0x81, 0xFF, 0xFF]);
    }

    #[test]
    fn test_return_value_int_layout() {
        let payload = TokenStream::new().return_value_int(2, Some(9)).build();
        assert_eq!(payload[0], 0xAC);
        assert_eq!(&payload[1..3], &[2, 0]);
        assert_eq!(payload[4], 1);
        assert_eq!(&payload[payload.len() - 5..], &[4, 9, 0, 0, 0]);
    }

    #[test]
    fn test_oversized_name_is_reported() {
        let name = "x".repeat(300);
        let result = TokenStream::new()
            .col_metadata(&[MockColumn::int(name)])
            .try_build();
        assert!(result.is_err());
    }
}
