//! # mssql-tls
//!
//! TLS negotiation layer for SQL Server connections.
//!
//! Encryption is negotiated in the cleartext PRELOGIN exchange. When either
//! side asks for it, the TLS handshake follows, its records carried inside
//! PRELOGIN packets:
//!
//! ```text
//! TCP Connect → PreLogin (cleartext) → TLS Handshake (in PRELOGIN packets) → Login7 (encrypted)
//! ```
//!
//! With login-only encryption the client drops TLS again after LOGIN7 and
//! the session continues in plain TDS.
//!
//! By default server certificates are validated against the webpki roots.
//! `TrustServerCertificate` disables validation and logs a warning.
//!
//! ```rust,ignore
//! use mssql_tls::{TlsConfig, TlsConnector, TlsMode};
//!
//! let mode = TlsMode::negotiate(EncryptionLevel::Off, server_level)?;
//! let connector = TlsConnector::new(TlsConfig::new().trust_server_certificate(true))?;
//! let tls = connector.connect_tunnelled(tcp, "db.example.com", 4096).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod negotiation;
pub mod prelogin_wrapper;

pub use config::{TlsConfig, TlsVersion};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use negotiation::TlsMode;
pub use prelogin_wrapper::TlsPreloginWrapper;

// Re-export tokio-rustls stream type for convenience
pub use tokio_rustls::client::TlsStream;
