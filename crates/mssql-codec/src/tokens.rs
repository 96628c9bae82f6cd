//! Token stream decoding.
//!
//! [`TokenReader`] walks the tokens of one TABULAR_RESULT message. Tokens
//! whose layout is fixed come from `tds-protocol`; COLMETADATA, ROW, NBCROW
//! and RETURNVALUE are decoded here with the data type table.
//!
//! The reader carries the active [`RowDescriptor`] so rows can be decoded.
//! A descriptor may be handed in from an earlier message: cursor fetches
//! are sent with `NO_METADATA` and their rows reuse the descriptor of the
//! opening call.

use bytes::{Buf, Bytes};
use mssql_types::{SqlValue, TypeInfo, decode_value};
use tds_protocol::codec::{read_b_varchar, read_bytes, read_i32_le, read_u8, read_u16_le, read_u32_le};
use tds_protocol::token::{decode_order, skip_u16_token, skip_u32_token};
use tds_protocol::{
    ColumnFlags, Done, EnvChange, LoginAck, PacketType, ReturnValueHeader, ServerMessage,
    TokenType,
};

use crate::error::CodecError;
use crate::row::{Column, Row, RowDescriptor};

/// COLMETADATA column count meaning "no metadata follows".
const NO_METADATA: u16 = 0xFFFF;

/// Which of the three DONE tokens was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneKind {
    /// DONE: end of a SQL statement.
    Done,
    /// DONEPROC: end of an RPC call.
    DoneProc,
    /// DONEINPROC: end of a statement inside an RPC call.
    DoneInProc,
}

/// An output parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnValue {
    /// Parameter ordinal.
    pub ordinal: u16,
    /// Parameter name, empty for unnamed parameters.
    pub name: String,
    /// Decoded value.
    pub value: SqlValue,
}

/// A decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// New result set metadata.
    ColMetaData(RowDescriptor),
    /// A row of the current result set.
    Row(Row),
    /// DONE, DONEPROC or DONEINPROC.
    Done(DoneKind, Done),
    /// Output parameter.
    ReturnValue(ReturnValue),
    /// Error message.
    Error(ServerMessage),
    /// Informational message.
    Info(ServerMessage),
    /// Login acknowledged.
    LoginAck(LoginAck),
    /// Session environment changed.
    EnvChange(EnvChange),
    /// Procedure return status.
    ReturnStatus(i32),
    /// ORDER BY column ordinals.
    Order(Vec<u16>),
}

/// Sequential token decoder over one message payload.
#[derive(Debug)]
pub struct TokenReader {
    src: Bytes,
    descriptor: Option<RowDescriptor>,
    cursor_mode: bool,
}

impl TokenReader {
    /// Reader for a plain result stream.
    #[must_use]
    pub fn new(src: Bytes) -> Self {
        Self {
            src,
            descriptor: None,
            cursor_mode: false,
        }
    }

    /// Reader for a cursor result stream: ROWSTAT columns are hidden and
    /// rows without fresh metadata use `descriptor`.
    #[must_use]
    pub fn for_cursor(src: Bytes, descriptor: Option<RowDescriptor>) -> Self {
        Self {
            src,
            descriptor,
            cursor_mode: true,
        }
    }

    /// Descriptor of the current result set.
    #[must_use]
    pub fn descriptor(&self) -> Option<&RowDescriptor> {
        self.descriptor.as_ref()
    }

    /// Whether the payload has been fully consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.src.has_remaining()
    }

    /// Decode the next token, `None` at the end of the payload.
    ///
    /// Browse-mode and session tokens the engine does not use are skipped by
    /// their length prefix.
    pub fn next_token(&mut self) -> Result<Option<Token>, CodecError> {
        loop {
            if !self.src.has_remaining() {
                return Ok(None);
            }
            let token_type = TokenType::from_u8(self.src.get_u8())?;
            tracing::trace!(?token_type, remaining = self.src.remaining(), "decoding token");

            let token = match token_type {
                TokenType::ColMetaData => match self.read_col_metadata()? {
                    Some(descriptor) => {
                        self.descriptor = Some(descriptor.clone());
                        Token::ColMetaData(descriptor)
                    }
                    None => continue,
                },
                TokenType::Row => Token::Row(self.read_row()?),
                TokenType::NbcRow => Token::Row(self.read_nbc_row()?),
                TokenType::Done => Token::Done(DoneKind::Done, Done::decode(&mut self.src)?),
                TokenType::DoneProc => {
                    Token::Done(DoneKind::DoneProc, Done::decode(&mut self.src)?)
                }
                TokenType::DoneInProc => {
                    Token::Done(DoneKind::DoneInProc, Done::decode(&mut self.src)?)
                }
                TokenType::Error => Token::Error(ServerMessage::decode(&mut self.src)?),
                TokenType::Info => Token::Info(ServerMessage::decode(&mut self.src)?),
                TokenType::LoginAck => Token::LoginAck(LoginAck::decode(&mut self.src)?),
                TokenType::EnvChange => Token::EnvChange(EnvChange::decode(&mut self.src)?),
                TokenType::ReturnStatus => Token::ReturnStatus(read_i32_le(&mut self.src)?),
                TokenType::ReturnValue => Token::ReturnValue(self.read_return_value()?),
                TokenType::Order => Token::Order(decode_order(&mut self.src)?),
                TokenType::TabName
                | TokenType::ColInfo
                | TokenType::Sspi
                | TokenType::FeatureExtAck => {
                    self.skip_unused(token_type)?;
                    continue;
                }
                TokenType::SessionState => {
                    skip_u32_token(&mut self.src)?;
                    continue;
                }
            };
            return Ok(Some(token));
        }
    }

    fn skip_unused(&mut self, token_type: TokenType) -> Result<(), CodecError> {
        if token_type == TokenType::FeatureExtAck {
            // Feature id, u32 length, data; terminated by 0xFF.
            loop {
                let feature = read_u8(&mut self.src)?;
                if feature == 0xFF {
                    return Ok(());
                }
                skip_u32_token(&mut self.src)?;
            }
        }
        skip_u16_token(&mut self.src)?;
        Ok(())
    }

    fn read_col_metadata(&mut self) -> Result<Option<RowDescriptor>, CodecError> {
        let count = read_u16_le(&mut self.src)?;
        if count == NO_METADATA {
            return Ok(None);
        }

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let user_type = read_u32_le(&mut self.src)?;
            let flags = ColumnFlags::from_bits_retain(read_u16_le(&mut self.src)?);
            let type_info = TypeInfo::decode(&mut self.src)?;
            let name = read_b_varchar(&mut self.src)?;
            columns.push(Column {
                name,
                user_type,
                flags,
                type_info,
            });
        }

        tracing::trace!(columns = columns.len(), "column metadata");
        Ok(Some(RowDescriptor::new(columns, self.cursor_mode)))
    }

    fn current_descriptor(&self) -> Result<&RowDescriptor, CodecError> {
        self.descriptor
            .as_ref()
            .ok_or(CodecError::UnexpectedToken("row before column metadata"))
    }

    fn read_row(&mut self) -> Result<Row, CodecError> {
        let descriptor = self.current_descriptor()?.clone();
        let wire = descriptor.wire_columns();
        let visible = descriptor.columns().len();

        let mut values = Vec::with_capacity(visible);
        for (i, column) in wire.iter().enumerate() {
            let value = decode_value(&mut self.src, &column.type_info)?;
            if i < visible {
                values.push(value);
            }
        }
        Ok(Row::new(descriptor.columns().clone(), values))
    }

    fn read_nbc_row(&mut self) -> Result<Row, CodecError> {
        let descriptor = self.current_descriptor()?.clone();
        let wire = descriptor.wire_columns();
        let visible = descriptor.columns().len();

        let bitmap = read_bytes(&mut self.src, wire.len().div_ceil(8))?;

        let mut values = Vec::with_capacity(visible);
        for (i, column) in wire.iter().enumerate() {
            let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
            let value = if is_null {
                SqlValue::Null
            } else {
                decode_value(&mut self.src, &column.type_info)?
            };
            if i < visible {
                values.push(value);
            }
        }
        Ok(Row::new(descriptor.columns().clone(), values))
    }

    fn read_return_value(&mut self) -> Result<ReturnValue, CodecError> {
        let header = ReturnValueHeader::decode(&mut self.src)?;
        let type_info = TypeInfo::decode(&mut self.src)?;
        let value = decode_value(&mut self.src, &type_info)?;
        Ok(ReturnValue {
            ordinal: header.ordinal,
            name: header.name,
            value,
        })
    }
}

/// Check that a message is a tabular result.
pub(crate) fn expect_tabular(message_type: PacketType) -> Result<(), CodecError> {
    if message_type == PacketType::TabularResult {
        Ok(())
    } else {
        Err(CodecError::UnexpectedMessage {
            expected: PacketType::TabularResult,
            actual: message_type,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mssql_testing::tokens::{MockColumn, ScalarValue, TokenStream};
    use tds_protocol::{DoneStatus, ProtocolError};

    fn read_all(mut reader: TokenReader) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = reader.next_token().unwrap() {
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn test_rows_and_done() {
        let payload = TokenStream::new()
            .col_metadata(&[MockColumn::int("id"), MockColumn::nvarchar("name", 20)])
            .row(&[ScalarValue::Int(1), ScalarValue::String("a".into())])
            .row(&[ScalarValue::Int(2), ScalarValue::Null])
            .done(DoneStatus::COUNT, 2)
            .build();

        let tokens = read_all(TokenReader::new(payload));
        assert_eq!(tokens.len(), 4);
        let Token::Row(row) = &tokens[2] else {
            unreachable!("expected row, got {:?}", tokens[2]);
        };
        assert_eq!(row.get::<i32>(0).unwrap(), 2);
        assert!(row.value(1).unwrap().is_null());
        assert!(matches!(
            tokens[3],
            Token::Done(DoneKind::Done, done) if done.count() == Some(2)
        ));
    }

    #[test]
    fn test_nbc_row_marks_nulls() {
        let payload = TokenStream::new()
            .col_metadata(&[
                MockColumn::int("a"),
                MockColumn::int("b"),
                MockColumn::nvarchar("c", 10),
            ])
            .nbc_row(&[
                ScalarValue::Null,
                ScalarValue::Int(5),
                ScalarValue::Null,
            ])
            .build();

        let tokens = read_all(TokenReader::new(payload));
        let Token::Row(row) = &tokens[1] else {
            unreachable!("expected row");
        };
        assert_eq!(
            row.values(),
            &[SqlValue::Null, SqlValue::Int(5), SqlValue::Null]
        );
    }

    #[test]
    fn test_cursor_mode_hides_rowstat() {
        let payload = TokenStream::new()
            .col_metadata(&[MockColumn::int("id"), MockColumn::int("ROWSTAT")])
            .row(&[ScalarValue::Int(9), ScalarValue::Int(1)])
            .build();

        let tokens = read_all(TokenReader::for_cursor(payload, None));
        let Token::Row(row) = &tokens[1] else {
            unreachable!("expected row");
        };
        assert_eq!(row.len(), 1);
        assert_eq!(row.columns().len(), 1);
        assert_eq!(row.get::<i32>(0).unwrap(), 9);
    }

    #[test]
    fn test_cached_descriptor_used_without_metadata() {
        let first = TokenStream::new()
            .col_metadata(&[MockColumn::int("id"), MockColumn::int("ROWSTAT")])
            .build();
        let mut reader = TokenReader::for_cursor(first, None);
        reader.next_token().unwrap();
        let cached = reader.descriptor().cloned();

        let second = TokenStream::new()
            .no_metadata()
            .row(&[ScalarValue::Int(3), ScalarValue::Int(1)])
            .build();
        let tokens = read_all(TokenReader::for_cursor(second, cached));
        assert_eq!(tokens.len(), 1);
        let Token::Row(row) = &tokens[0] else {
            unreachable!("expected row");
        };
        assert_eq!(row.get::<i32>(0).unwrap(), 3);
    }

    #[test]
    fn test_row_without_metadata_is_error() {
        let payload = TokenStream::new().row(&[ScalarValue::Int(1)]).build();
        let mut reader = TokenReader::new(payload);
        assert!(matches!(
            reader.next_token(),
            Err(CodecError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_messages_and_return_values() {
        let payload = TokenStream::new()
            .info(16954, 10, "executed directly")
            .error(208, 16, "Invalid object name")
            .return_value_int(0, Some(42))
            .return_status(0)
            .order(&[1, 2])
            .done_proc(DoneStatus::FINAL, 0)
            .build();

        let tokens = read_all(TokenReader::new(payload));
        assert!(matches!(&tokens[0], Token::Info(m) if m.number == 16954));
        assert!(matches!(&tokens[1], Token::Error(m) if m.class == 16));
        assert!(matches!(
            &tokens[2],
            Token::ReturnValue(rv) if rv.value == SqlValue::Int(42)
        ));
        assert_eq!(tokens[3], Token::ReturnStatus(0));
        assert_eq!(tokens[4], Token::Order(vec![1, 2]));
        assert!(matches!(tokens[5], Token::Done(DoneKind::DoneProc, _)));
    }

    #[test]
    fn test_env_change_and_login_ack() {
        let payload = TokenStream::new()
            .env_change(&EnvChange::BeginTransaction(0x0102_0304))
            .login_ack("Microsoft SQL Server")
            .build();
        let tokens = read_all(TokenReader::new(payload));
        assert_eq!(
            tokens[0],
            Token::EnvChange(EnvChange::BeginTransaction(0x0102_0304))
        );
        assert!(matches!(&tokens[1], Token::LoginAck(ack) if ack.prog_name == "Microsoft SQL Server"));
    }

    #[test]
    fn test_unknown_token_is_error() {
        let mut reader = TokenReader::new(Bytes::from_static(&[0x01]));
        assert!(matches!(
            reader.next_token(),
            Err(CodecError::Protocol(ProtocolError::InvalidTokenType(0x01)))
        ));
    }

    #[test]
    fn test_truncated_done_is_error() {
        let mut reader = TokenReader::new(Bytes::from_static(&[0xFD, 0x00, 0x00]));
        assert!(reader.next_token().is_err());
    }
}
