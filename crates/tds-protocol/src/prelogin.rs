//! TDS pre-login message.
//!
//! The pre-login message is the first exchange on a connection. It carries an
//! option table (type, big-endian offset, big-endian length) terminated by
//! `0xFF`, followed by the raw option data the table points into.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::version::{ServerVersion, TdsVersion};

/// Pre-login option types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name (for named instances).
    Instance = 0x02,
    /// Thread ID.
    ThreadId = 0x03,
    /// MARS support.
    Mars = 0x04,
    /// Terminator (end of options).
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0xFF => Ok(Self::Terminator),
            _ => Err(ProtocolError::InvalidPreloginOption(value)),
        }
    }
}

/// Encryption level for connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt only the login packet.
    #[default]
    Off = 0x00,
    /// Encrypt the whole session.
    On = 0x01,
    /// No encryption at all.
    NotSupported = 0x02,
    /// Server demands encryption.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::NotSupported),
            0x03 => Ok(Self::Required),
            _ => Err(ProtocolError::MalformedPreLogin("unknown encryption level")),
        }
    }

    /// Check if the whole session is encrypted at this level.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// Pre-login message builder and parser.
///
/// The same struct describes the client request and the server answer. In the
/// answer, `server_version` holds the product version rather than a TDS
/// protocol version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreLogin {
    /// TDS version the client requests.
    pub version: TdsVersion,
    /// SQL Server product version (server response only).
    pub server_version: Option<ServerVersion>,
    /// Encryption level.
    pub encryption: EncryptionLevel,
    /// Instance name (for named instances).
    pub instance: Option<String>,
    /// Thread ID.
    pub thread_id: Option<u32>,
    /// MARS enabled.
    pub mars: bool,
}

impl PreLogin {
    /// Create a new pre-login message with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: TdsVersion::V7_4,
            ..Self::default()
        }
    }

    /// Set the TDS version.
    #[must_use]
    pub fn with_version(mut self, version: TdsVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the encryption level.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Enable MARS.
    #[must_use]
    pub fn with_mars(mut self, enabled: bool) -> Self {
        self.mars = enabled;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the client thread id.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Encode the pre-login message to bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut data = BytesMut::new();
        let mut entries: Vec<(PreLoginOption, usize, usize)> = Vec::with_capacity(5);

        let start = data.len();
        data.put_u32(self.version.raw());
        data.put_u16_le(0);
        entries.push((PreLoginOption::Version, start, data.len() - start));

        let start = data.len();
        data.put_u8(self.encryption as u8);
        entries.push((PreLoginOption::Encryption, start, 1));

        if let Some(instance) = &self.instance {
            let start = data.len();
            data.put_slice(instance.as_bytes());
            data.put_u8(0);
            entries.push((PreLoginOption::Instance, start, data.len() - start));
        }

        if let Some(thread_id) = self.thread_id {
            let start = data.len();
            data.put_u32(thread_id);
            entries.push((PreLoginOption::ThreadId, start, 4));
        }

        let start = data.len();
        data.put_u8(u8::from(self.mars));
        entries.push((PreLoginOption::Mars, start, 1));

        let table_len = entries.len() * 5 + 1;
        let mut buf = BytesMut::with_capacity(table_len + data.len());
        for (option, offset, len) in entries {
            buf.put_u8(option as u8);
            buf.put_u16((table_len + offset) as u16);
            buf.put_u16(len as u16);
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        buf.put_slice(&data);
        buf.freeze()
    }

    /// Decode a pre-login response from the server.
    ///
    /// Offsets in the option table are absolute from the start of the payload.
    /// Any entry pointing outside the payload is a fatal error. Unknown option
    /// types are skipped.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut prelogin = Self::default();
        let mut src = payload;

        let mut options = Vec::new();
        loop {
            if !src.has_remaining() {
                return Err(ProtocolError::MalformedPreLogin("missing terminator"));
            }
            let option_type = src.get_u8();
            if option_type == PreLoginOption::Terminator as u8 {
                break;
            }
            if src.remaining() < 4 {
                return Err(ProtocolError::MalformedPreLogin("truncated option table"));
            }
            let offset = src.get_u16() as usize;
            let length = src.get_u16() as usize;
            options.push((option_type, offset, length));
        }

        let table_len = options.len() * 5 + 1;
        for (option_type, offset, length) in options {
            if offset < table_len || offset + length > payload.len() {
                return Err(ProtocolError::MalformedPreLogin("option data out of bounds"));
            }
            let data = &payload[offset..offset + length];

            match PreLoginOption::from_u8(option_type) {
                Ok(PreLoginOption::Version) => {
                    if length < 4 {
                        return Err(ProtocolError::MalformedPreLogin("short version"));
                    }
                    let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                    let sub_build = if length >= 6 {
                        u16::from_le_bytes([data[4], data[5]])
                    } else {
                        0
                    };
                    prelogin.server_version = Some(ServerVersion::from_raw(raw, sub_build));
                    prelogin.version = TdsVersion::new(raw);
                }
                Ok(PreLoginOption::Encryption) => {
                    let level = data
                        .first()
                        .ok_or(ProtocolError::MalformedPreLogin("empty encryption"))?;
                    prelogin.encryption = EncryptionLevel::from_u8(*level)?;
                }
                Ok(PreLoginOption::Mars) => {
                    prelogin.mars = data.first().is_some_and(|&b| b != 0);
                }
                Ok(PreLoginOption::Instance) => {
                    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                    if let Ok(s) = core::str::from_utf8(&data[..end]) {
                        if !s.is_empty() {
                            prelogin.instance = Some(s.to_string());
                        }
                    }
                }
                Ok(PreLoginOption::ThreadId) if length >= 4 => {
                    prelogin.thread_id =
                        Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}
