//! Mock TDS server for integration testing.
//!
//! This module provides a scripted SQL Server stand-in listening on
//! loopback TCP, so the client can be exercised end to end without a real
//! database instance.
//!
//! ## Features
//!
//! - Simulates the TDS handshake (prelogin without encryption, login)
//! - SQL batch responses keyed by statement text
//! - Scripted RPC responses, consumed in request order
//! - Every post-login request is recorded for assertions
//! - Responses can be split across many packets
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::mock_server::{MockResponse, MockTdsServer};
//!
//! let server = MockTdsServer::builder()
//!     .with_response("SELECT 1", MockResponse::scalar_int(1))
//!     .build()
//!     .await?;
//!
//! // Connect a client to server.addr()...
//! let requests = server.requests().await;
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tds_protocol::{DoneStatus, EncryptionLevel, EnvChange, PacketType, PreLogin, ProtocolError};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};

use crate::peer::Peer;
use crate::rpc::{RpcRequestView, SqlBatchView};
use crate::tokens::{MockColumn, ScalarValue, TokenStream};

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire structure.
    #[error("wire error: {0}")]
    Wire(#[from] ProtocolError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server already stopped.
    #[error("Server already stopped")]
    Stopped,
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// A request received after login.
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// Message type.
    pub packet_type: PacketType,
    /// Reassembled payload.
    pub payload: Bytes,
}

impl MockRequest {
    /// The statement text of a SQL batch.
    #[must_use]
    pub fn sql(&self) -> Option<String> {
        if self.packet_type != PacketType::SqlBatch {
            return None;
        }
        SqlBatchView::parse(&self.payload).ok().map(|v| v.sql)
    }

    /// The decoded calls of an RPC request.
    #[must_use]
    pub fn rpc(&self) -> Option<RpcRequestView> {
        if self.packet_type != PacketType::Rpc {
            return None;
        }
        RpcRequestView::parse(&self.payload).ok()
    }
}

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return a single scalar value.
    Scalar(ScalarValue),

    /// Return multiple rows with columns.
    Rows {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Row data.
        rows: Vec<Vec<ScalarValue>>,
    },

    /// Return an error.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity class.
        severity: u8,
    },

    /// Return rows affected count (for INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// Return raw pre-encoded TDS tokens.
    Raw(Bytes),

    /// Compute the response from the request.
    Custom(Arc<dyn Fn(&MockRequest) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", rows)
                .finish(),
            Self::Error {
                number,
                message,
                severity,
            } => f
                .debug_struct("Error")
                .field("number", number)
                .field("message", message)
                .field("severity", severity)
                .finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Create a scalar integer response.
    pub fn scalar_int(value: i32) -> Self {
        Self::Scalar(ScalarValue::Int(value))
    }

    /// Create a scalar string response.
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::Scalar(ScalarValue::String(value.into()))
    }

    /// Create an empty result response.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Create a rows affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Create an error response.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// Create a multi-row response.
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// Create a response computed per request.
    pub fn custom(f: impl Fn(&MockRequest) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Encode the response tokens for `request`.
    ///
    /// RPC responses end in DONEPROC, everything else in DONE.
    pub fn encode(&self, request: &MockRequest) -> Result<Bytes> {
        let rpc = request.packet_type == PacketType::Rpc;
        let finish = |stream: TokenStream, status: DoneStatus, count: u64| {
            if rpc {
                stream.return_status(0).done_proc(status, count)
            } else {
                stream.done(status, count)
            }
        };

        let stream = match self {
            Self::Scalar(value) => {
                let column = value.column("");
                finish(
                    TokenStream::new()
                        .col_metadata(&[column])
                        .row(std::slice::from_ref(value)),
                    DoneStatus::COUNT,
                    1,
                )
            }
            Self::Rows { columns, rows } => {
                let mut stream = TokenStream::new().col_metadata(columns);
                for row in rows {
                    stream = stream.row(row);
                }
                finish(stream, DoneStatus::COUNT, rows.len() as u64)
            }
            Self::Error {
                number,
                message,
                severity,
            } => finish(
                TokenStream::new().error(*number, *severity, message),
                DoneStatus::ERROR,
                0,
            ),
            Self::RowsAffected(n) => finish(TokenStream::new(), DoneStatus::COUNT, *n),
            Self::Raw(data) => return Ok(data.clone()),
            Self::Custom(f) => return f(request).encode(request),
        };
        Ok(stream.try_build()?)
    }
}

/// Configuration for the mock TDS server.
#[derive(Default)]
pub struct MockServerConfig {
    /// Pre-configured responses for specific SQL batches.
    responses: HashMap<String, MockResponse>,
    /// Scripted responses for RPC requests, in order.
    rpc_responses: VecDeque<MockResponse>,
    /// Default response for unmatched requests.
    default_response: Option<MockResponse>,
    /// Server name to report in LoginAck.
    server_name: String,
    /// Database reported after login.
    database: String,
    /// Packet size confirmed after login.
    packet_size: u32,
    /// Payload bytes per response packet; `None` sends one packet.
    response_chunk: Option<usize>,
}

/// Builder for `MockTdsServer`.
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: MockServerConfig {
                responses: HashMap::new(),
                rpc_responses: VecDeque::new(),
                default_response: Some(MockResponse::empty()),
                server_name: "MockSQLServer".to_string(),
                database: "master".to_string(),
                packet_size: 4096,
                response_chunk: None,
            },
        }
    }

    /// Add a response for a specific SQL batch.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(sql.into(), response);
        self
    }

    /// Queue a response for the next unanswered RPC request.
    pub fn with_rpc_response(mut self, response: MockResponse) -> Self {
        self.config.rpc_responses.push_back(response);
        self
    }

    /// Set the default response for unmatched requests.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Set the server name reported in LoginAck.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Set the default database.
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Set the packet size confirmed after login.
    pub fn with_packet_size(mut self, size: u32) -> Self {
        self.config.packet_size = size;
        self
    }

    /// Split every response into packets of `chunk` payload bytes.
    pub fn with_response_chunk(mut self, chunk: usize) -> Self {
        self.config.response_chunk = Some(chunk);
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the server handle and connection tasks.
struct Shared {
    config: MockServerConfig,
    rpc_script: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<MockRequest>>,
    connection_count: Mutex<usize>,
}

/// A mock TDS server for testing.
///
/// The server accepts any login, answers SQL batches from its response
/// table and RPC requests from its script, and records every request.
pub struct MockTdsServer {
    /// Server address.
    addr: SocketAddr,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
}

impl MockTdsServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(mut config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let rpc_script = std::mem::take(&mut config.rpc_responses);
        let shared = Arc::new(Shared {
            config,
            rpc_script: Mutex::new(rpc_script),
            requests: Mutex::new(Vec::new()),
            connection_count: Mutex::new(0),
        });

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            shared: shared.clone(),
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _peer_addr)) => {
                                let shared = shared.clone();
                                tokio::spawn(async move {
                                    *shared.connection_count.lock().await += 1;
                                    if let Err(e) = handle_connection(stream, &shared).await {
                                        tracing::debug!("Connection error: {}", e);
                                    }
                                    let mut count = shared.connection_count.lock().await;
                                    *count = count.saturating_sub(1);
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(server)
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Get the current connection count.
    pub async fn connection_count(&self) -> usize {
        *self.shared.connection_count.lock().await
    }

    /// Requests received so far, in arrival order.
    pub async fn requests(&self) -> Vec<MockRequest> {
        self.shared.requests.lock().await.clone()
    }

    /// Stop the server.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl fmt::Debug for MockTdsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTdsServer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle a single client connection.
async fn handle_connection(stream: TcpStream, shared: &Shared) -> Result<()> {
    let config = &shared.config;
    let mut peer = Peer::new(stream);

    let (packet_type, _) = peer.recv_message().await?;
    if packet_type != PacketType::PreLogin {
        return Err(MockServerError::Protocol(format!(
            "Expected PreLogin, got {packet_type:?}"
        )));
    }
    let prelogin = PreLogin::new().with_encryption(EncryptionLevel::NotSupported);
    peer.send(PacketType::TabularResult, &prelogin.encode()).await?;

    let (packet_type, _) = peer.recv_message().await?;
    if packet_type != PacketType::Tds7Login {
        return Err(MockServerError::Protocol(format!(
            "Expected Tds7Login, got {packet_type:?}"
        )));
    }
    let login = TokenStream::new()
        .env_change(&EnvChange::Database {
            new: config.database.clone(),
            old: "master".to_string(),
        })
        .env_change(&EnvChange::PacketSize {
            new: config.packet_size,
        })
        .login_ack(&config.server_name)
        .done(DoneStatus::FINAL, 0)
        .try_build()?;
    peer.send(PacketType::TabularResult, &login).await?;

    loop {
        let (packet_type, payload) = match peer.recv_message().await {
            Ok(message) => message,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let request = MockRequest {
            packet_type,
            payload,
        };
        shared.requests.lock().await.push(request.clone());

        let response = match packet_type {
            PacketType::SqlBatch => {
                let sql = SqlBatchView::parse(&request.payload)?.sql;
                tracing::trace!(sql = %sql, "mock batch");
                config
                    .responses
                    .get(&sql)
                    .or(config.default_response.as_ref())
                    .map(|r| r.encode(&request))
                    .transpose()?
            }
            PacketType::Rpc => {
                let scripted = shared.rpc_script.lock().await.pop_front();
                scripted
                    .as_ref()
                    .or(config.default_response.as_ref())
                    .map(|r| r.encode(&request))
                    .transpose()?
            }
            PacketType::Attention => Some(
                TokenStream::new()
                    .done(DoneStatus::ATTN, 0)
                    .try_build()?,
            ),
            other => {
                tracing::debug!("Unexpected packet type: {:?}", other);
                None
            }
        };

        if let Some(payload) = response {
            match config.response_chunk {
                Some(chunk) => {
                    peer.send_split(PacketType::TabularResult, &payload, chunk)
                        .await?;
                }
                None => peer.send(PacketType::TabularResult, &payload).await?,
            }
        }
    }

    Ok(())
}
