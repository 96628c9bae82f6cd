//! Client error types.

use mssql_codec::{CodecError, ServerError};
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connection closed or lost.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connecting took longer than the configured timeout.
    #[error("connection timed out")]
    ConnectTimeout,

    /// Login was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] mssql_tls::TlsError),

    /// Protocol engine error.
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// Type conversion error.
    #[error("type error: {0}")]
    Type(#[from] mssql_types::TypeError),

    /// Server returned an error.
    #[error(transparent)]
    Server(ServerError),

    /// The server answered a command with the wrong kind of result.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::ConnectionClosed => Self::ConnectionClosed,
            CodecError::Server(e) => Self::Server(e),
            CodecError::AuthenticationFailed(reason) => Self::Authentication(reason),
            CodecError::Io(e) => Self::Io(e),
            CodecError::Type(e) => Self::Type(e),
            other => Self::Codec(other),
        }
    }
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectTimeout | Self::ConnectionClosed | Self::Io(_) => true,
            Self::Server(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Check whether the connection can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ConnectionClosed | Self::Io(_) | Self::Tls(_) | Self::Authentication(_) => true,
            Self::Codec(e) => e.is_fatal(),
            Self::Server(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// The database error, if the server reported one.
    #[must_use]
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Server(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        self.server_error().is_some_and(|e| e.number == number)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
