//! TDS token primitives.
//!
//! A tabular result is a sequence of self-delimited tokens, each introduced
//! by a one-byte type. This module parses the tokens whose layout does not
//! depend on column metadata. COLMETADATA, ROW, NBCROW and the value part of
//! RETURNVALUE need the data type table and are decoded by the codec layer.
//!
//! Encoders are provided for the tokens a test server needs to emit.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
    ensure, read_b_varchar, read_u8, read_u16_le, read_u32_le, read_us_varchar, skip,
    write_b_varchar, write_us_varchar,
};
use crate::collation::Collation;
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Return status of a procedure.
    ReturnStatus = 0x79,
    /// Column metadata.
    ColMetaData = 0x81,
    /// Table names (browse mode).
    TabName = 0xA4,
    /// Column info (browse mode).
    ColInfo = 0xA5,
    /// Order by columns.
    Order = 0xA9,
    /// Error message.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Output parameter value.
    ReturnValue = 0xAC,
    /// Login acknowledgment.
    LoginAck = 0xAD,
    /// Feature extension acknowledgment.
    FeatureExtAck = 0xAE,
    /// Row.
    Row = 0xD1,
    /// Null bitmap compressed row.
    NbcRow = 0xD2,
    /// Environment change.
    EnvChange = 0xE3,
    /// Session state.
    SessionState = 0xE4,
    /// SSPI payload.
    Sspi = 0xED,
    /// Statement done.
    Done = 0xFD,
    /// Procedure done.
    DoneProc = 0xFE,
    /// Statement inside a procedure done.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create a token type from a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        let token = match value {
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAC => Self::ReturnValue,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xE4 => Self::SessionState,
            0xED => Self::Sspi,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return Err(ProtocolError::InvalidTokenType(value)),
        };
        Ok(token)
    }
}

/// Skip a token carrying a little-endian `u16` length prefix.
pub fn skip_u16_token(src: &mut impl Buf) -> Result<(), ProtocolError> {
    let len = read_u16_le(src)? as usize;
    skip(src, len)
}

/// Skip a token carrying a little-endian `u32` length prefix.
pub fn skip_u32_token(src: &mut impl Buf) -> Result<(), ProtocolError> {
    let len = read_u32_le(src)? as usize;
    skip(src, len)
}

bitflags! {
    /// Status bits of DONE, DONEPROC and DONEINPROC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DoneStatus: u16 {
        /// Final token of the request.
        const FINAL = 0x0000;
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// `row_count` is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention.
        const ATTN = 0x0020;
        /// Server error, results discarded.
        const SRVERROR = 0x0100;
    }
}

/// DONE, DONEPROC or DONEINPROC body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Token of the current command.
    pub cur_cmd: u16,
    /// Affected row count, valid when [`DoneStatus::COUNT`] is set.
    pub row_count: u64,
}

impl Done {
    /// Body size in bytes (excluding the token type byte).
    pub const SIZE: usize = 12;

    /// A final DONE carrying a row count.
    #[must_use]
    pub fn with_count(row_count: u64) -> Self {
        Self {
            status: DoneStatus::COUNT,
            cur_cmd: 0,
            row_count,
        }
    }

    /// Decode a done body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, Self::SIZE)?;
        Ok(Self {
            status: DoneStatus::from_bits_retain(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Encode as `token_type` (DONE, DONEPROC or DONEINPROC).
    pub fn encode(&self, token_type: TokenType, dst: &mut impl BufMut) {
        dst.put_u8(token_type as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// More results follow.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// The statement reported an error.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.status.intersects(DoneStatus::ERROR | DoneStatus::SRVERROR)
    }

    /// Affected rows, if the count is valid.
    #[must_use]
    pub fn count(&self) -> Option<u64> {
        self.status.contains(DoneStatus::COUNT).then_some(self.row_count)
    }
}

/// ERROR or INFO token body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerMessage {
    /// Decode an ERROR or INFO body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let len = read_u16_le(src)? as usize;
        ensure(src, len)?;
        let mut body = src.copy_to_bytes(len);

        ensure(&body, 6)?;
        let number = body.get_i32_le();
        let state = body.get_u8();
        let class = body.get_u8();
        let message = read_us_varchar(&mut body)?;
        let server = read_b_varchar(&mut body)?;
        let procedure = read_b_varchar(&mut body)?;
        ensure(&body, 4)?;
        let line = body.get_i32_le();

        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Encode as ERROR or INFO.
    pub fn encode(&self, token_type: TokenType, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        body.put_i32_le(self.number);
        body.put_u8(self.state);
        body.put_u8(self.class);
        write_us_varchar(&mut body, &self.message)?;
        write_b_varchar(&mut body, &self.server)?;
        write_b_varchar(&mut body, &self.procedure)?;
        body.put_i32_le(self.line);

        dst.put_u8(token_type as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
        Ok(())
    }
}

/// LOGINACK token body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface (1 = T-SQL).
    pub interface: u8,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version (major, minor, build high, build low).
    pub prog_version: u32,
}

impl LoginAck {
    /// Decode a LOGINACK body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let len = read_u16_le(src)? as usize;
        ensure(src, len)?;
        let mut body = src.copy_to_bytes(len);

        let interface = read_u8(&mut body)?;
        ensure(&body, 4)?;
        // version is sent big-endian here
        let tds_version = TdsVersion::new(body.get_u32());
        let prog_name = read_b_varchar(&mut body)?;
        ensure(&body, 4)?;
        let prog_version = body.get_u32();

        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }

    /// Encode a LOGINACK token.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        body.put_u8(self.interface);
        body.put_u32(self.tds_version.raw());
        write_b_varchar(&mut body, &self.prog_name)?;
        body.put_u32(self.prog_version);

        dst.put_u8(TokenType::LoginAck as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
        Ok(())
    }
}

/// ENVCHANGE sub-type numbers.
pub mod env_type {
    /// Database changed.
    pub const DATABASE: u8 = 1;
    /// Language changed.
    pub const LANGUAGE: u8 = 2;
    /// Packet size changed.
    pub const PACKET_SIZE: u8 = 4;
    /// SQL collation changed.
    pub const SQL_COLLATION: u8 = 7;
    /// Transaction began.
    pub const BEGIN_TRANSACTION: u8 = 8;
    /// Transaction committed.
    pub const COMMIT_TRANSACTION: u8 = 9;
    /// Transaction rolled back.
    pub const ROLLBACK_TRANSACTION: u8 = 10;
    /// Enlisted in a distributed transaction.
    pub const ENLIST_DTC_TRANSACTION: u8 = 11;
    /// Defected from a distributed transaction.
    pub const DEFECT_TRANSACTION: u8 = 12;
    /// Transaction ended.
    pub const TRANSACTION_ENDED: u8 = 17;
    /// Reset connection acknowledged.
    pub const RESET_CONNECTION_ACK: u8 = 18;
}

/// Decoded ENVCHANGE token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database.
        new: String,
        /// Previous database.
        old: String,
    },
    /// Session language changed.
    Language {
        /// New language.
        new: String,
    },
    /// Negotiated packet size changed.
    PacketSize {
        /// New size in bytes.
        new: u32,
    },
    /// Default collation changed.
    SqlCollation(Option<Collation>),
    /// A transaction began; carries the new descriptor.
    BeginTransaction(u64),
    /// Enlisted in a distributed transaction; carries the descriptor.
    EnlistDtcTransaction(u64),
    /// Transaction committed.
    CommitTransaction,
    /// Transaction rolled back.
    RollbackTransaction,
    /// Defected from a distributed transaction.
    DefectTransaction,
    /// Transaction ended.
    TransactionEnded,
    /// Reset connection acknowledged.
    ResetConnectionAck,
    /// Sub-type this client does not track; skipped by length.
    Other(u8),
}

impl EnvChange {
    /// Decode an ENVCHANGE body.
    ///
    /// The body is bounded by its length prefix; whatever a sub-type does not
    /// consume is discarded so the stream stays aligned.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let len = read_u16_le(src)? as usize;
        ensure(src, len)?;
        let mut body = src.copy_to_bytes(len);
        let env_type = read_u8(&mut body)?;

        let change = match env_type {
            env_type::DATABASE => Self::Database {
                new: read_b_varchar(&mut body)?,
                old: read_b_varchar(&mut body)?,
            },
            env_type::LANGUAGE => Self::Language {
                new: read_b_varchar(&mut body)?,
            },
            env_type::PACKET_SIZE => {
                let new = read_b_varchar(&mut body)?;
                let new = new
                    .parse()
                    .map_err(|_| ProtocolError::StringEncoding("non-numeric packet size"))?;
                Self::PacketSize { new }
            }
            env_type::SQL_COLLATION => {
                let new_len = read_u8(&mut body)? as usize;
                if new_len >= Collation::SIZE {
                    Self::SqlCollation(Some(Collation::decode(&mut body)?))
                } else {
                    Self::SqlCollation(None)
                }
            }
            env_type::BEGIN_TRANSACTION => Self::BeginTransaction(read_descriptor(&mut body)?),
            env_type::ENLIST_DTC_TRANSACTION => {
                Self::EnlistDtcTransaction(read_descriptor(&mut body)?)
            }
            env_type::COMMIT_TRANSACTION => Self::CommitTransaction,
            env_type::ROLLBACK_TRANSACTION => Self::RollbackTransaction,
            env_type::DEFECT_TRANSACTION => Self::DefectTransaction,
            env_type::TRANSACTION_ENDED => Self::TransactionEnded,
            env_type::RESET_CONNECTION_ACK => Self::ResetConnectionAck,
            other => Self::Other(other),
        };
        Ok(change)
    }

    /// New transaction descriptor implied by this change, if any.
    ///
    /// Begin and enlist carry a descriptor; commit, rollback, defect and end
    /// reset it to zero.
    #[must_use]
    pub fn transaction_descriptor(&self) -> Option<u64> {
        match self {
            Self::BeginTransaction(d) | Self::EnlistDtcTransaction(d) => Some(*d),
            Self::CommitTransaction
            | Self::RollbackTransaction
            | Self::DefectTransaction
            | Self::TransactionEnded => Some(0),
            _ => None,
        }
    }

    /// Sub-type byte of this change.
    #[must_use]
    pub fn env_type(&self) -> u8 {
        match self {
            Self::Database { .. } => env_type::DATABASE,
            Self::Language { .. } => env_type::LANGUAGE,
            Self::PacketSize { .. } => env_type::PACKET_SIZE,
            Self::SqlCollation(_) => env_type::SQL_COLLATION,
            Self::BeginTransaction(_) => env_type::BEGIN_TRANSACTION,
            Self::EnlistDtcTransaction(_) => env_type::ENLIST_DTC_TRANSACTION,
            Self::CommitTransaction => env_type::COMMIT_TRANSACTION,
            Self::RollbackTransaction => env_type::ROLLBACK_TRANSACTION,
            Self::DefectTransaction => env_type::DEFECT_TRANSACTION,
            Self::TransactionEnded => env_type::TRANSACTION_ENDED,
            Self::ResetConnectionAck => env_type::RESET_CONNECTION_ACK,
            Self::Other(t) => *t,
        }
    }

    /// Encode an ENVCHANGE token.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        body.put_u8(self.env_type());
        match self {
            Self::Database { new, old } => {
                write_b_varchar(&mut body, new)?;
                write_b_varchar(&mut body, old)?;
            }
            Self::Language { new } => {
                write_b_varchar(&mut body, new)?;
                body.put_u8(0);
            }
            Self::PacketSize { new } => {
                write_b_varchar(&mut body, &new.to_string())?;
                body.put_u8(0);
            }
            Self::SqlCollation(collation) => {
                match collation {
                    Some(c) => {
                        body.put_u8(Collation::SIZE as u8);
                        c.encode(&mut body);
                    }
                    None => body.put_u8(0),
                }
                body.put_u8(0);
            }
            Self::BeginTransaction(d) | Self::EnlistDtcTransaction(d) => {
                body.put_u8(8);
                body.put_u64_le(*d);
                body.put_u8(0);
            }
            _ => {
                // empty new and old values
                body.put_u8(0);
                body.put_u8(0);
            }
        }

        dst.put_u8(TokenType::EnvChange as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
        Ok(())
    }
}

fn read_descriptor(body: &mut Bytes) -> Result<u64, ProtocolError> {
    let len = read_u8(body)? as usize;
    if len < 8 {
        skip(body, len)?;
        return Ok(0);
    }
    ensure(body, len)?;
    let descriptor = body.get_u64_le();
    body.advance(len - 8);
    Ok(descriptor)
}

/// Fixed prefix of a RETURNVALUE token, up to the type info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnValueHeader {
    /// Parameter ordinal.
    pub ordinal: u16,
    /// Parameter name.
    pub name: String,
    /// Status (1 = output parameter, 2 = user-defined function result).
    pub status: u8,
    /// User type.
    pub user_type: u32,
    /// Column flags.
    pub flags: u16,
}

impl ReturnValueHeader {
    /// Decode the part of a RETURNVALUE body preceding the type info.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let ordinal = read_u16_le(src)?;
        let name = read_b_varchar(src)?;
        let status = read_u8(src)?;
        let user_type = read_u32_le(src)?;
        let flags = read_u16_le(src)?;
        Ok(Self {
            ordinal,
            name,
            status,
            user_type,
            flags,
        })
    }
}

/// Decode an ORDER body into column ordinals.
pub fn decode_order(src: &mut impl Buf) -> Result<Vec<u16>, ProtocolError> {
    let len = read_u16_le(src)? as usize;
    ensure(src, len)?;
    Ok((0..len / 2).map(|_| src.get_u16_le()).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_done_roundtrip() {
        let done = Done {
            status: DoneStatus::COUNT | DoneStatus::MORE,
            cur_cmd: 0xC1,
            row_count: 42,
        };
        let mut buf = BytesMut::new();
        done.encode(TokenType::DoneProc, &mut buf);
        assert_eq!(buf[0], 0xFE);

        let decoded = Done::decode(&mut &buf[1..]).unwrap();
        assert_eq!(decoded, done);
        assert!(decoded.has_more());
        assert_eq!(decoded.count(), Some(42));
    }

    #[test]
    fn test_done_without_count() {
        let raw = [0x02, 0x00, 0x00, 0x00, 5, 0, 0, 0, 0, 0, 0, 0];
        let done = Done::decode(&mut &raw[..]).unwrap();
        assert!(done.has_error());
        assert_eq!(done.count(), None);
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage {
            number: 208,
            state: 1,
            class: 16,
            message: "Invalid object name 'nope'.".into(),
            server: "srv".into(),
            procedure: String::new(),
            line: 1,
        };
        let mut buf = BytesMut::new();
        msg.encode(TokenType::Error, &mut buf).unwrap();
        assert_eq!(buf[0], TokenType::Error as u8);

        let mut src = buf.freeze();
        src.advance(1);
        assert_eq!(ServerMessage::decode(&mut src).unwrap(), msg);
        assert!(src.is_empty());
    }

    #[test]
    fn test_login_ack_roundtrip() {
        let ack = LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4,
            prog_name: "Microsoft SQL Server".into(),
            prog_version: 0x1000_0FA0,
        };
        let mut buf = BytesMut::new();
        ack.encode(&mut buf).unwrap();
        let decoded = LoginAck::decode(&mut &buf[1..]).unwrap();
        assert_eq!(decoded, ack);
    }

    #[test]
    fn test_envchange_begin_transaction() {
        let mut buf = BytesMut::new();
        EnvChange::BeginTransaction(0xAABB).encode(&mut buf).unwrap();
        let change = EnvChange::decode(&mut &buf[1..]).unwrap();
        assert_eq!(change, EnvChange::BeginTransaction(0xAABB));
        assert_eq!(change.transaction_descriptor(), Some(0xAABB));
        assert_eq!(EnvChange::CommitTransaction.transaction_descriptor(), Some(0));
    }

    #[test]
    fn test_envchange_unknown_type_skipped_by_length() {
        // type 13 with arbitrary payload, followed by a DONE token byte
        let raw = [0x05, 0x00, 13, 0xDE, 0xAD, 0xBE, 0xEF, 0xFD];
        let mut src = &raw[..];
        let change = EnvChange::decode(&mut src).unwrap();
        assert_eq!(change, EnvChange::Other(13));
        assert_eq!(src, &[0xFD]);
    }

    #[test]
    fn test_envchange_packet_size() {
        let mut buf = BytesMut::new();
        EnvChange::PacketSize { new: 8000 }.encode(&mut buf).unwrap();
        assert_eq!(
            EnvChange::decode(&mut &buf[1..]).unwrap(),
            EnvChange::PacketSize { new: 8000 }
        );
    }

    #[test]
    fn test_envchange_database() {
        let change = EnvChange::Database {
            new: "tempdb".into(),
            old: "master".into(),
        };
        let mut buf = BytesMut::new();
        change.encode(&mut buf).unwrap();
        assert_eq!(EnvChange::decode(&mut &buf[1..]).unwrap(), change);
    }

    #[test]
    fn test_order() {
        let raw = [0x04, 0x00, 0x01, 0x00, 0x03, 0x00];
        assert_eq!(decode_order(&mut &raw[..]).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_unknown_token_type() {
        assert_eq!(TokenType::from_u8(0x00), Err(ProtocolError::InvalidTokenType(0x00)));
    }
}
