//! # tds-protocol
//!
//! Wire structures of the MS-TDS (Tabular Data Stream) protocol used by
//! Microsoft SQL Server: packet headers, PRELOGIN, LOGIN7, SQL batch and RPC
//! request framing, and the token primitives of tabular responses.
//!
//! The crate does no I/O. Framing over a byte stream lives in `mssql-codec`;
//! value encoding lives in `mssql-types`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod collation;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod rpc;
pub mod sql_batch;
pub mod token;
pub mod types;
pub mod version;

pub use collation::Collation;
pub use error::ProtocolError;
pub use login7::{Login7, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use rpc::{ParamStatus, ProcId, RpcCall, RpcOptionFlags, RpcRequest};
pub use sql_batch::encode_sql_batch;
pub use token::{Done, DoneStatus, EnvChange, LoginAck, ReturnValueHeader, ServerMessage, TokenType};
pub use types::{ColumnFlags, TypeId};
pub use version::{ServerVersion, TdsVersion};
