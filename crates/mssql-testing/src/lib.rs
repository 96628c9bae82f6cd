//! # mssql-testing
//!
//! Test infrastructure for the TDS engine.
//!
//! ## Modules
//!
//! - [`tokens`]: builders for server token streams (COLMETADATA, ROW,
//!   DONE, RETURNVALUE, ...)
//! - [`peer`]: the server end of an in-memory transport, working on raw
//!   packets
//! - [`rpc`]: decoded views of SQL batch and RPC requests
//! - [`mock_server`]: a scripted server on loopback TCP
//!
//! ## Mock Server Example
//!
//! ```rust,ignore
//! use mssql_testing::mock_server::{MockResponse, MockTdsServer};
//! use mssql_testing::tokens::{MockColumn, ScalarValue};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockTdsServer::builder()
//!         .with_response(
//!             "SELECT * FROM users WHERE id = 1",
//!             MockResponse::rows(
//!                 vec![MockColumn::int("id"), MockColumn::nvarchar("name", 50)],
//!                 vec![vec![ScalarValue::Int(1), ScalarValue::String("Alice".into())]],
//!             ),
//!         )
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let addr = server.addr();
//!     // Connect a client to addr...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;
pub mod peer;
pub mod rpc;
pub mod tokens;

pub use mock_server::{
    MockRequest, MockResponse, MockServerBuilder, MockServerConfig, MockServerError, MockTdsServer,
};
pub use peer::{Peer, RawPacket};
pub use rpc::{RpcRequestView, SqlBatchView};
pub use tokens::{MockColumn, ScalarValue, TokenStream};
