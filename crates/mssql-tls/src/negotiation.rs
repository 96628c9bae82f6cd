//! Encryption negotiation from the PRELOGIN exchange.

use tds_protocol::prelogin::EncryptionLevel;

use crate::error::TlsError;

/// How the connection is protected after PRELOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsMode {
    /// No TLS at all.
    None,
    /// TLS protects the LOGIN7 packet only; the rest of the session is
    /// plain TDS.
    LoginOnly,
    /// Every packet after PRELOGIN is encrypted.
    Full,
}

impl TlsMode {
    /// Decide the mode from the level the client asked for and the level
    /// the server answered with.
    ///
    /// | client \ server | Off        | On / Required | NotSupported |
    /// |-----------------|------------|---------------|--------------|
    /// | Off             | login only | full          | none         |
    /// | On / Required   | error      | full          | error        |
    /// | NotSupported    | none       | error if Required, else none | none |
    pub fn negotiate(client: EncryptionLevel, server: EncryptionLevel) -> Result<Self, TlsError> {
        use EncryptionLevel::{NotSupported, Off, On, Required};

        let mode = match (client, server) {
            (NotSupported, Required) => return Err(TlsError::EncryptionRequired),
            (NotSupported, _) | (Off, NotSupported) => Self::None,
            (Off, Off) => Self::LoginOnly,
            (_, On | Required) => Self::Full,
            (On | Required, Off | NotSupported) => return Err(TlsError::EncryptionNotSupported),
        };
        tracing::info!(?client, ?server, ?mode, "negotiated encryption");
        Ok(mode)
    }
}
