//! TDS LOGIN7 message construction.
//!
//! The message is a 94-byte fixed header followed by UTF-16LE strings. The
//! header holds an offset/length slot per string; offsets are relative to the
//! start of the message. Encoding is done in two passes: the slots are reserved
//! as zeros first, then backfilled once each string has been appended and its
//! position is known.
//!
//! The password is obfuscated, not encrypted. Only send it over TLS.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_len, write_utf16_string};
use crate::error::ProtocolError;
use crate::packet::DEFAULT_PACKET_SIZE;
use crate::version::TdsVersion;

/// LOGIN7 header size (fixed portion).
pub const LOGIN7_HEADER_SIZE: usize = 94;

const OFFSET_TABLE_START: usize = 36;

bitflags! {
    /// LOGIN7 option flags 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on USE database.
        const USE_DB_NOTIFY = 0x20;
        /// Initial database failure is fatal.
        const DATABASE_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG_WARN = 0x80;
    }
}

bitflags! {
    /// LOGIN7 option flags 2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags2: u8 {
        /// Initial language failure is fatal.
        const LANGUAGE_FATAL = 0x01;
        /// ODBC client.
        const ODBC = 0x02;
        /// Integrated security.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// LOGIN7 type flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        /// T-SQL dialect.
        const SQL_TSQL = 0x01;
        /// OLEDB client.
        const OLEDB = 0x10;
        /// Read-only application intent.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// LOGIN7 option flags 3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags3: u8 {
        /// Change password request.
        const CHANGE_PASSWORD = 0x01;
        /// User instance.
        const USER_INSTANCE = 0x02;
        /// Accept unknown collations.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
    }
}

/// LOGIN7 message builder.
#[derive(Clone)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process ID.
    pub client_pid: u32,
    /// Connection ID.
    pub connection_id: u32,
    /// Option flags 1.
    pub option_flags1: OptionFlags1,
    /// Option flags 2.
    pub option_flags2: OptionFlags2,
    /// Type flags.
    pub type_flags: TypeFlags,
    /// Option flags 3.
    pub option_flags3: OptionFlags3,
    /// Client timezone offset in minutes.
    pub client_timezone: i32,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL login name.
    pub username: String,
    /// SQL login password.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client interface library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client ID (MAC address, typically zeros).
    pub client_id: [u8; 6],
}

impl std::fmt::Debug for Login7 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login7")
            .field("tds_version", &self.tds_version)
            .field("packet_size", &self.packet_size)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("app_name", &self.app_name)
            .field("server_name", &self.server_name)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: DEFAULT_PACKET_SIZE as u32,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: OptionFlags1::USE_DB_NOTIFY | OptionFlags1::DATABASE_FATAL,
            option_flags2: OptionFlags2::LANGUAGE_FATAL | OptionFlags2::ODBC,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("mssql-rs"),
            server_name: String::new(),
            library_name: String::from("mssql-rs"),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
        }
    }
}

/// String fields in offset-table order.
#[derive(Clone, Copy)]
enum Field {
    Text,
    Password,
    Skip,
}

impl Login7 {
    /// Create a new builder with default flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TDS version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set SQL authentication credentials.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the client interface library name.
    #[must_use]
    pub fn with_library_name(mut self, library_name: impl Into<String>) -> Self {
        self.library_name = library_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the LOGIN7 message.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(LOGIN7_HEADER_SIZE + 256);

        // Fixed header; length is backfilled at the end.
        buf.put_u32_le(0);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(self.option_flags3.bits());
        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);

        // First pass: reserve the offset table.
        debug_assert_eq!(buf.len(), OFFSET_TABLE_START);
        buf.put_bytes(0, 9 * 4);
        buf.put_slice(&self.client_id);
        buf.put_bytes(0, 3 * 4 + 4);
        debug_assert_eq!(buf.len(), LOGIN7_HEADER_SIZE);

        // Second pass: append each string and backfill its slot.
        let fields: [(&str, Field); 9] = [
            (&self.hostname, Field::Text),
            (&self.username, Field::Text),
            (&self.password, Field::Password),
            (&self.app_name, Field::Text),
            (&self.server_name, Field::Text),
            ("", Field::Skip),
            (&self.library_name, Field::Text),
            (&self.language, Field::Text),
            (&self.database, Field::Text),
        ];
        for (index, (value, kind)) in fields.iter().enumerate() {
            let slot = OFFSET_TABLE_START + index * 4;
            let offset = buf.len();
            let chars = utf16_len(value);
            match kind {
                Field::Text => write_utf16_string(&mut buf, value),
                Field::Password => write_obfuscated_password(&mut buf, value),
                Field::Skip => {}
            }
            backfill_slot(&mut buf, slot, offset, chars)?;
        }

        // SSPI, attach-db-file and change-password slots point at the end with
        // zero length.
        let tail = buf.len();
        for slot in [78, 82, 86] {
            backfill_slot(&mut buf, slot, tail, 0)?;
        }

        let total = u32::try_from(buf.len()).map_err(|_| ProtocolError::FieldTooLong {
            field: "login7",
            len: buf.len(),
            max: u32::MAX as usize,
        })?;
        buf[0..4].copy_from_slice(&total.to_le_bytes());

        Ok(buf.freeze())
    }
}

fn backfill_slot(
    buf: &mut BytesMut,
    slot: usize,
    offset: usize,
    chars: usize,
) -> Result<(), ProtocolError> {
    let offset = u16::try_from(offset).map_err(|_| ProtocolError::FieldTooLong {
        field: "login7 offset",
        len: offset,
        max: u16::MAX as usize,
    })?;
    let chars = u16::try_from(chars).map_err(|_| ProtocolError::FieldTooLong {
        field: "login7 string",
        len: chars,
        max: u16::MAX as usize,
    })?;
    buf[slot..slot + 2].copy_from_slice(&offset.to_le_bytes());
    buf[slot + 2..slot + 4].copy_from_slice(&chars.to_le_bytes());
    Ok(())
}

/// Swap the nibbles of every password byte, then XOR with `0xA5`.
pub fn write_obfuscated_password(dst: &mut impl BufMut, password: &str) {
    for c in password.encode_utf16() {
        for b in c.to_le_bytes() {
            dst.put_u8(b.rotate_right(4) ^ 0xA5);
        }
    }
}
