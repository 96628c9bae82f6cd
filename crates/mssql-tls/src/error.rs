//! TLS-related error types.

use thiserror::Error;

/// Errors that can occur while negotiating or establishing TLS.
#[derive(Debug, Error)]
pub enum TlsError {
    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The name used for certificate validation is not a valid server name.
    #[error("invalid server name for TLS: {0}")]
    InvalidServerName(String),

    /// A configured root certificate was rejected.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// IO error during TLS operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server requires encryption but the client cannot encrypt.
    #[error("server requires encryption")]
    EncryptionRequired,

    /// Client requires encryption but the server does not support it.
    #[error("server does not support encryption")]
    EncryptionNotSupported,
}
