//! # mssql-codec
//!
//! The TDS protocol engine: packet framing, message reassembly, token
//! decoding and the command state machines that turn requests into typed
//! results.
//!
//! ## Architecture
//!
//! ```text
//! byte stream → TdsCodec (packets) → MessageAssembler (messages)
//!             → Command::on_message (tokens) → Response
//! ```
//!
//! Requests travel the other way: [`Command::encode`] produces a message
//! payload and [`chunk_message`] splits it into packets no larger than the
//! negotiated size.
//!
//! A [`Connection`] drives one command at a time, which is what the login
//! handshake needs. Once logged in, a [`Driver`] task owns the connection
//! and pipelines commands submitted through a [`DriverHandle`]: every
//! request is written immediately and the in-flight queue matches each
//! response to the command at its head.
//!
//! ```rust,ignore
//! use mssql_codec::{Command, Driver, Response};
//!
//! let (driver, handle) = Driver::new(conn, session, 64);
//! tokio::spawn(driver.run());
//!
//! let first = handle.submit(Command::sql_batch("SELECT 1")).await?;
//! let second = handle.submit(Command::sql_batch("SELECT 2")).await?;
//! let Response::Query(rows) = first.wait().await? else { unreachable!() };
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod command;
pub mod connection;
pub mod driver;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;
pub mod row;
pub mod session;
pub mod statement;
pub mod tokens;

pub use command::{Command, Encoded, Outbound, Response, Step};
pub use connection::Connection;
pub use driver::{DEFAULT_QUEUE_DEPTH, Driver, DriverHandle, PendingResponse};
pub use error::{CodecError, ServerError};
pub use framed::{PacketReader, PacketWriter};
pub use message::{Message, MessageAssembler, chunk_message};
pub use packet_codec::{Packet, TdsCodec};
pub use row::{Column, InfoMessage, QueryResult, ResultSet, Row, RowDescriptor};
pub use session::{CursorId, CursorState, ServerInfo, SessionState};
pub use statement::PreparedStatement;
pub use tokens::{DoneKind, ReturnValue, Token, TokenReader};
