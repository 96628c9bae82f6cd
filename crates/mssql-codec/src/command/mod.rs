//! Command codecs.
//!
//! Every protocol operation is a variant of [`Command`]. A command is driven
//! in two steps:
//!
//! 1. [`Command::encode`] produces the request message, or completes the
//!    command locally when no round trip is needed (a lazy prepare, closing
//!    a resource the server never allocated, an empty batch).
//! 2. [`Command::on_message`] is called once per reassembled response
//!    message, in send order. It returns [`Step::Send`] when the command
//!    needs another round trip (the second phase of a batch, the first fetch
//!    of a cursor) and [`Step::Done`] with the terminal outcome.
//!
//! All per-connection state (transaction descriptor, cursors) is passed in
//! as [`SessionState`]; commands own only their own progress.

mod accumulator;
mod batch;
mod close;
mod cursor;
mod extended;
mod handshake;

use bytes::Bytes;
use mssql_types::SqlValue;
use tds_protocol::{Login7, PacketType, PreLogin};

pub use batch::SqlBatchCommand;
pub use close::{CloseCursorCommand, CloseStatementCommand};
pub use cursor::CursorCommand;
pub use extended::{ExecuteBatchCommand, ExecuteCommand};
pub use handshake::{LoginCommand, PreLoginCommand};

use crate::error::CodecError;
use crate::message::Message;
use crate::row::QueryResult;
use crate::session::{CursorId, ServerInfo, SessionState};
use crate::statement::PreparedStatement;

/// A request message ready to be chunked into packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Packet type of every packet of the message.
    pub packet_type: PacketType,
    /// Message payload.
    pub payload: Bytes,
}

impl Outbound {
    /// A request of `packet_type` carrying `payload`.
    #[must_use]
    pub fn new(packet_type: PacketType, payload: Bytes) -> Self {
        Self {
            packet_type,
            payload,
        }
    }

    pub(crate) fn rpc(payload: Bytes) -> Self {
        Self::new(PacketType::Rpc, payload)
    }
}

/// Result of [`Command::encode`].
#[derive(Debug)]
pub enum Encoded {
    /// Send this message and wait for the response.
    Send(Outbound),
    /// The command finished without touching the transport.
    Local(Result<Response, CodecError>),
}

/// Result of [`Command::on_message`].
#[derive(Debug)]
pub enum Step {
    /// Wait for the next message.
    Pending,
    /// Send a follow-up request and wait for its response.
    Send(Outbound),
    /// The command is complete.
    Done(Result<Response, CodecError>),
}

/// Successful outcome of a command.
#[derive(Debug, Clone)]
pub enum Response {
    /// Server PRELOGIN options.
    PreLogin(PreLogin),
    /// Login acknowledged.
    Login(ServerInfo),
    /// Rows, counts and messages of a query.
    Query(QueryResult),
    /// A statement handle, prepared lazily on first execute.
    Prepared(PreparedStatement),
    /// One page of a cursor query.
    Cursor {
        /// Rows of this page.
        result: QueryResult,
        /// Whether the server holds more rows.
        has_more: bool,
    },
    /// A resource or the connection was closed.
    Closed,
}

/// One protocol operation.
#[derive(Debug)]
pub enum Command {
    /// PRELOGIN negotiation.
    PreLogin(PreLoginCommand),
    /// LOGIN7 authentication.
    Login(LoginCommand),
    /// SQL batch.
    SqlBatch(SqlBatchCommand),
    /// Local prepare.
    Prepare(PreparedStatement),
    /// Prepared statement execution.
    Execute(ExecuteCommand),
    /// Prepared statement execution over several parameter sets.
    ExecuteBatch(ExecuteBatchCommand),
    /// Server cursor query or fetch.
    Cursor(CursorCommand),
    /// Release a prepared statement.
    CloseStatement(CloseStatementCommand),
    /// Release a server cursor.
    CloseCursor(CloseCursorCommand),
    /// Close the transport.
    CloseConnection,
}

impl Command {
    /// PRELOGIN request.
    #[must_use]
    pub fn pre_login(request: PreLogin) -> Self {
        Self::PreLogin(PreLoginCommand::new(request))
    }

    /// LOGIN7 request.
    #[must_use]
    pub fn login(login: Login7) -> Self {
        Self::Login(LoginCommand::new(login))
    }

    /// SQL batch.
    #[must_use]
    pub fn sql_batch(sql: impl Into<String>) -> Self {
        Self::SqlBatch(SqlBatchCommand::new(sql))
    }

    /// Prepare `sql` without a round trip.
    #[must_use]
    pub fn prepare(sql: impl Into<String>) -> Self {
        Self::Prepare(PreparedStatement::new(sql))
    }

    /// Execute `statement` once.
    #[must_use]
    pub fn execute(statement: PreparedStatement, params: Vec<SqlValue>) -> Self {
        Self::Execute(ExecuteCommand::new(statement, params))
    }

    /// Execute `statement` once per parameter set.
    #[must_use]
    pub fn execute_batch(statement: PreparedStatement, batch: Vec<Vec<SqlValue>>) -> Self {
        Self::ExecuteBatch(ExecuteBatchCommand::new(statement, batch))
    }

    /// Open or fetch from the cursor identified by `id`.
    #[must_use]
    pub fn cursor_query(
        id: CursorId,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
        fetch_size: u32,
    ) -> Self {
        Self::Cursor(CursorCommand::new(id, sql, params, fetch_size))
    }

    /// Release a prepared statement.
    #[must_use]
    pub fn close_statement(statement: PreparedStatement) -> Self {
        Self::CloseStatement(CloseStatementCommand::new(statement))
    }

    /// Release the cursor identified by `id`.
    #[must_use]
    pub fn close_cursor(id: CursorId) -> Self {
        Self::CloseCursor(CloseCursorCommand::new(id))
    }

    /// Close the connection.
    #[must_use]
    pub fn close_connection() -> Self {
        Self::CloseConnection
    }

    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreLogin(_) => "prelogin",
            Self::Login(_) => "login",
            Self::SqlBatch(_) => "sql_batch",
            Self::Prepare(_) => "prepare",
            Self::Execute(_) => "execute",
            Self::ExecuteBatch(_) => "execute_batch",
            Self::Cursor(_) => "cursor_query",
            Self::CloseStatement(_) => "close_statement",
            Self::CloseCursor(_) => "close_cursor",
            Self::CloseConnection => "close_connection",
        }
    }

    /// Whether this command tears the connection down.
    #[must_use]
    pub fn is_close_connection(&self) -> bool {
        matches!(self, Self::CloseConnection)
    }

    /// Whether later commands must wait before being written.
    ///
    /// A command that may still send a follow-up request holds the queue:
    /// a later request would reach the server first and the responses would
    /// no longer match the queue order. So does one waiting for the handle
    /// of its `sp_prepexec`, so that a later execution of the same statement
    /// reuses that handle instead of preparing a second one.
    #[must_use]
    pub fn holds_back_requests(&self) -> bool {
        match self {
            Self::Execute(cmd) => cmd.holds_back_requests(),
            Self::ExecuteBatch(cmd) => cmd.holds_back_requests(),
            Self::Cursor(cmd) => cmd.holds_back_requests(),
            _ => false,
        }
    }

    /// Produce the request message.
    pub fn encode(&mut self, session: &mut SessionState) -> Encoded {
        let encoded = match self {
            Self::PreLogin(cmd) => cmd.encode(),
            Self::Login(cmd) => cmd.encode(),
            Self::SqlBatch(cmd) => cmd.encode(session),
            Self::Prepare(statement) => Encoded::Local(Ok(Response::Prepared(statement.clone()))),
            Self::Execute(cmd) => cmd.encode(session),
            Self::ExecuteBatch(cmd) => cmd.encode(session),
            Self::Cursor(cmd) => cmd.encode(session),
            Self::CloseStatement(cmd) => cmd.encode(session),
            Self::CloseCursor(cmd) => cmd.encode(session),
            Self::CloseConnection => Encoded::Local(Ok(Response::Closed)),
        };
        match &encoded {
            Encoded::Send(out) => tracing::debug!(
                command = self.name(),
                packet_type = ?out.packet_type,
                len = out.payload.len(),
                "encoded request"
            ),
            Encoded::Local(_) => tracing::debug!(command = self.name(), "completed locally"),
        }
        encoded
    }

    /// Handle one response message.
    pub fn on_message(&mut self, message: Message, session: &mut SessionState) -> Step {
        let step = match self {
            Self::PreLogin(cmd) => cmd.on_message(message),
            Self::Login(cmd) => cmd.on_message(message, session),
            Self::SqlBatch(cmd) => cmd.on_message(message, session),
            Self::Execute(cmd) => cmd.on_message(message, session),
            Self::ExecuteBatch(cmd) => cmd.on_message(message, session),
            Self::Cursor(cmd) => cmd.on_message(message, session),
            Self::CloseStatement(cmd) => cmd.on_message(message, session),
            Self::CloseCursor(cmd) => cmd.on_message(message, session),
            Self::Prepare(_) | Self::CloseConnection => Step::Done(Err(
                CodecError::UnexpectedToken("response to a command that sends no request"),
            )),
        };
        if let Step::Done(Err(e)) = &step {
            tracing::debug!(command = self.name(), error = %e, "command failed");
        }
        step
    }
}

/// Turn an encoding result into an [`Encoded`] request.
fn send_or_fail(
    packet_type: PacketType,
    payload: Result<Bytes, CodecError>,
) -> Encoded {
    match payload {
        Ok(payload) => Encoded::Send(Outbound::new(packet_type, payload)),
        Err(e) => Encoded::Local(Err(e)),
    }
}
