//! Client configuration.
//!
//! A [`Config`] is built with chained setters or parsed from one of two
//! textual forms:
//!
//! ```text
//! sqlserver://[user[:[password]]@]host[:port][/database][?attribute=value&...]
//! Server=host,port;Database=db;User Id=user;Password=secret;Encrypt=true
//! ```
//!
//! [`Config::from_str`](std::str::FromStr) accepts either and picks the parser
//! by the presence of a URI scheme.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use mssql_tls::TlsConfig;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tds_protocol::packet::{DEFAULT_PACKET_SIZE, clamp_packet_size};
use tds_protocol::prelogin::{EncryptionLevel, PreLogin};
use tds_protocol::Login7;

use crate::error::{Error, Result};

/// Name reported to the server when none is configured.
pub const DEFAULT_APP_NAME: &str = "mssql-rs";

#[allow(clippy::expect_used)]
static URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:sqlserver|mssql)://",
        r"(?:(?P<userinfo>[^@/?]+)@)?",
        r"(?P<netloc>\[[0-9a-fA-F:.]+\]|[a-zA-Z0-9\-._~%]+)?",
        r"(?::(?P<port>\d+))?",
        r"(?:/(?P<database>[a-zA-Z0-9\-._~%!*]+))?",
        r"(?:\?(?P<attributes>.*))?$",
    ))
    .expect("connection URI pattern is valid")
});

/// Configuration for connecting to SQL Server.
#[derive(Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 1433).
    pub port: u16,

    /// Login name.
    pub user: String,

    /// Login password.
    pub password: String,

    /// Initial database, empty for the login's default.
    pub database: String,

    /// Requested TDS packet size, within 512..=32767.
    pub packet_size: usize,

    /// Application name (shown in SQL Server management tools).
    pub application_name: String,

    /// Client interface name sent in LOGIN7.
    pub interface_name: String,

    /// Encryption level requested in PRELOGIN.
    ///
    /// `Off` still encrypts the login packet when the server can.
    pub encryption: EncryptionLevel,

    /// Whether to trust the server certificate without validation.
    pub trust_server_certificate: bool,

    /// Time allowed for TCP connect, TLS handshake and login together.
    pub connect_timeout: Duration,

    /// Attributes the parsers did not recognise, lower-cased.
    pub properties: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            user: "sa".to_string(),
            password: String::new(),
            database: String::new(),
            packet_size: DEFAULT_PACKET_SIZE,
            application_name: DEFAULT_APP_NAME.to_string(),
            interface_name: DEFAULT_APP_NAME.to_string(),
            encryption: EncryptionLevel::Off,
            trust_server_certificate: false,
            connect_timeout: Duration::from_secs(15),
            properties: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("packet_size", &self.packet_size)
            .field("application_name", &self.application_name)
            .field("encryption", &self.encryption)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `sqlserver://` (or `mssql://`) connection URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let caps = URI_RE
            .captures(uri)
            .ok_or_else(|| Error::Config(format!("invalid connection URI: {uri}")))?;
        let mut config = Self::default();

        if let Some(userinfo) = caps.name("userinfo") {
            config.apply_user_info(userinfo.as_str())?;
        }
        if let Some(netloc) = caps.name("netloc") {
            config.set_host_value(&decode(netloc.as_str())?);
        }
        if let Some(port) = caps.name("port") {
            config.port = parse_port(port.as_str())?;
        }
        if let Some(database) = caps.name("database") {
            config.database = decode(database.as_str())?;
        }
        if let Some(attributes) = caps.name("attributes") {
            config.apply_attributes(attributes.as_str())?;
        }

        Ok(config)
    }

    /// Parse an ADO.NET-style connection string.
    ///
    /// ```text
    /// Server=localhost,1434;Database=mydb;User Id=sa;Password=secret;
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "address" => {
                    let value = value.strip_prefix("tcp:").unwrap_or(value);
                    if let Some((host, port)) = value.split_once(',') {
                        config.host = host.trim().to_string();
                        config.port = parse_port(port.trim())?;
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => config.port = parse_port(value)?,
                "database" | "initial catalog" => config.database = value.to_string(),
                "user id" | "uid" | "user" => config.user = value.to_string(),
                "password" | "pwd" => config.password = value.to_string(),
                "application name" | "app" => config.application_name = value.to_string(),
                "connect timeout" | "connection timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                "encrypt" => config.encryption = parse_encryption(value)?,
                "trustservercertificate" | "trust server certificate" => {
                    config.trust_server_certificate = parse_bool(value)?;
                }
                "packet size" => config.packet_size = parse_packet_size(value)?,
                _ => {
                    tracing::debug!(key = %key, "keeping unknown connection string option");
                    config.properties.insert(key, value.to_string());
                }
            }
        }

        Ok(config)
    }

    fn apply_user_info(&mut self, userinfo: &str) -> Result<()> {
        match userinfo.split_once(':') {
            None => self.user = decode(userinfo)?,
            Some((_, password)) if password.contains(':') => {
                return Err(Error::Config(
                    "multiple ':' delimiters in user info".to_string(),
                ));
            }
            Some(("", _)) => {
                return Err(Error::Config(
                    "a password cannot be given without a user".to_string(),
                ));
            }
            Some((user, password)) => {
                self.user = decode(user)?;
                self.password = decode(password)?;
            }
        }
        Ok(())
    }

    fn apply_attributes(&mut self, attributes: &str) -> Result<()> {
        for pair in attributes.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::Config(format!("missing '=' in connection attribute \"{pair}\""))
            })?;
            let key = key.to_lowercase();
            let value = decode(value.trim())?;

            match key.as_str() {
                "host" => self.set_host_value(&value),
                "port" => self.port = parse_port(&value)?,
                "user" => self.user = value,
                "password" => self.password = value,
                "database" => self.database = value,
                "packetsize" => self.packet_size = parse_packet_size(&value)?,
                "encrypt" => self.encryption = parse_encryption(&value)?,
                "trustservercertificate" => self.trust_server_certificate = parse_bool(&value)?,
                "applicationname" => self.application_name = value,
                _ => {
                    self.properties.insert(key, value);
                }
            }
        }
        Ok(())
    }

    fn set_host_value(&mut self, value: &str) {
        let host = value
            .strip_prefix('[')
            .and_then(|v| v.strip_suffix(']'))
            .unwrap_or(value);
        self.host = host.to_string();
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login name and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the requested packet size, clamped to the legal range.
    #[must_use]
    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = clamp_packet_size(size);
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the requested encryption level.
    #[must_use]
    pub fn encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Trust the server certificate without validation.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// PRELOGIN request for this configuration.
    #[must_use]
    pub fn prelogin(&self) -> PreLogin {
        PreLogin::new().with_encryption(self.encryption)
    }

    /// LOGIN7 request for this configuration.
    #[must_use]
    pub fn login7(&self) -> Login7 {
        let mut login = Login7::new()
            .with_sql_auth(&self.user, &self.password)
            .with_app_name(&self.application_name)
            .with_library_name(&self.interface_name)
            .with_server_name(&self.host)
            .with_packet_size(clamp_packet_size(self.packet_size) as u32);
        if !self.database.is_empty() {
            login = login.with_database(&self.database);
        }
        login
    }

    /// TLS settings for the handshake.
    #[must_use]
    pub fn tls_config(&self) -> TlsConfig {
        TlsConfig::new().trust_server_certificate(self.trust_server_certificate)
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains("://") {
            Self::from_uri(s)
        } else {
            Self::from_connection_string(s)
        }
    }
}

fn decode(value: &str) -> Result<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::Config(format!("invalid percent-encoding in \"{value}\": {e}")))
}

fn parse_port(value: &str) -> Result<u16> {
    match value.parse::<u32>() {
        Ok(port @ 1..=65535) => Ok(port as u16),
        Ok(_) => Err(Error::Config(format!("port out of range 1-65535: {value}"))),
        Err(_) => Err(Error::Config(format!("invalid port: {value}"))),
    }
}

fn parse_packet_size(value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map(clamp_packet_size)
        .map_err(|_| Error::Config(format!("invalid packet size: {value}")))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean: {value}"))),
    }
}

fn parse_encryption(value: &str) -> Result<EncryptionLevel> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "mandatory" => Ok(EncryptionLevel::On),
        "false" | "no" | "0" | "optional" => Ok(EncryptionLevel::Off),
        "required" => Ok(EncryptionLevel::Required),
        "notsupported" | "disabled" => Ok(EncryptionLevel::NotSupported),
        _ => Err(Error::Config(format!("invalid encryption setting: {value}"))),
    }
}
