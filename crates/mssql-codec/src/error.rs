//! Codec error types.

use std::fmt;

use mssql_types::TypeError;
use tds_protocol::{ProtocolError, ServerMessage};
use thiserror::Error;

use crate::session::CursorId;

/// Errors raised while framing, decoding or running commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Transport I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A value could not be decoded or encoded.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Packet header declares a length shorter than the header itself.
    #[error("invalid packet header")]
    InvalidHeader,

    /// Packet exceeds the negotiated maximum.
    #[error("packet of {size} bytes exceeds maximum {max}")]
    PacketTooLarge {
        /// Declared size.
        size: usize,
        /// Current maximum.
        max: usize,
    },

    /// A message of the wrong packet type arrived.
    #[error("unexpected {actual:?} message, expected {expected:?}")]
    UnexpectedMessage {
        /// Packet type the command expected.
        expected: tds_protocol::PacketType,
        /// Packet type that arrived.
        actual: tds_protocol::PacketType,
    },

    /// A token arrived where the command cannot accept it.
    #[error("unexpected token: {0}")]
    UnexpectedToken(&'static str),

    /// The transport closed or failed while the command was queued.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server reported an error.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Login finished without a LOGINACK token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A batch execute was given no parameter sets.
    #[error("batch execute requires at least one parameter set")]
    EmptyBatch,

    /// No cursor with this id is open.
    #[error("unknown cursor {0}")]
    UnknownCursor(CursorId),
}

impl CodecError {
    /// Check whether the connection can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::Protocol(_)
            | Self::InvalidHeader
            | Self::PacketTooLarge { .. }
            | Self::UnexpectedMessage { .. }
            | Self::ConnectionClosed
            | Self::AuthenticationFailed(_) => true,
            Self::Server(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// A database error carried by an ERROR token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Error number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Error class/severity (0-25).
    pub class: u8,
    /// Error message.
    pub message: String,
    /// Server name where error occurred.
    pub server: String,
    /// Stored procedure name, empty for ad hoc batches.
    pub procedure: String,
    /// Line number in the SQL batch or procedure.
    pub line: i32,
}

impl ServerError {
    /// Check if the server terminated the connection (severity 20 and above).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class >= 20
    }

    /// Check if the error usually succeeds on retry.
    ///
    /// Covers deadlock victims, lock and query timeouts, and the Azure SQL
    /// throttling and failover errors.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.number,
            1205 | 1222 | -2 | 4060 | 40197 | 40501 | 40613 | 49918 | 49919 | 49920
        )
    }
}

impl From<ServerMessage> for ServerError {
    fn from(m: ServerMessage) -> Self {
        Self {
            number: m.number,
            state: m.state,
            class: m.class,
            message: m.message,
            server: m.server,
            procedure: m.procedure,
            line: m.line,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server error {} (class {}, state {}): {}",
            self.number, self.class, self.state, self.message
        )
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(number: i32, class: u8) -> ServerError {
        ServerError {
            number,
            state: 1,
            class,
            message: "boom".into(),
            server: "srv".into(),
            procedure: String::new(),
            line: 1,
        }
    }

    #[test]
    fn test_severity_classification() {
        assert!(!error(547, 16).is_fatal());
        assert!(error(4014, 20).is_fatal());
        assert!(CodecError::Server(error(4014, 20)).is_fatal());
        assert!(!CodecError::EmptyBatch.is_fatal());
    }

    #[test]
    fn test_transient_numbers() {
        assert!(error(1205, 13).is_transient());
        assert!(!error(208, 16).is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            error(208, 16).to_string(),
            "server error 208 (class 16, state 1): boom"
        );
    }
}
