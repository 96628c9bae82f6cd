//! Mock TDS server fidelity tests.
//!
//! These drive the mock server over real loopback TCP with the raw packet
//! peer and check its answers with the wire decoders from `tds-protocol`.

#![allow(clippy::unwrap_used, clippy::panic)]

use bytes::{Buf, Bytes};
use mssql_testing::mock_server::{MockResponse, MockTdsServer};
use mssql_testing::peer::Peer;
use mssql_testing::tokens::{MockColumn, ScalarValue, TokenStream};
use tds_protocol::token::TokenType;
use tds_protocol::{
    Done, DoneStatus, EncryptionLevel, EnvChange, Login7, LoginAck, PacketType, PreLogin,
    ParamStatus, ProcId, RpcCall, RpcRequest, ServerMessage, encode_sql_batch,
};
use tokio::net::TcpStream;

async fn logged_in(server: &MockTdsServer) -> Peer<TcpStream> {
    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut peer = Peer::new(stream);

    peer.send(PacketType::PreLogin, &PreLogin::new().encode())
        .await
        .unwrap();
    let (_, payload) = peer.recv_message().await.unwrap();
    let prelogin = PreLogin::decode(&payload).unwrap();
    assert_eq!(prelogin.encryption, EncryptionLevel::NotSupported);

    let login = Login7::new().with_sql_auth("sa", "secret").encode().unwrap();
    peer.send(PacketType::Tds7Login, &login).await.unwrap();
    let (packet_type, _) = peer.recv_message().await.unwrap();
    assert_eq!(packet_type, PacketType::TabularResult);
    peer
}

fn token_types(mut payload: Bytes) -> Vec<TokenType> {
    let mut types = Vec::new();
    while payload.has_remaining() {
        let token_type = TokenType::from_u8(payload.get_u8()).unwrap();
        match token_type {
            TokenType::Done | TokenType::DoneProc | TokenType::DoneInProc => {
                Done::decode(&mut payload).unwrap();
            }
            TokenType::Error | TokenType::Info => {
                ServerMessage::decode(&mut payload).unwrap();
            }
            TokenType::EnvChange => {
                EnvChange::decode(&mut payload).unwrap();
            }
            TokenType::LoginAck => {
                LoginAck::decode(&mut payload).unwrap();
            }
            TokenType::ReturnStatus => payload.advance(4),
            other => panic!("unexpected token {other:?}"),
        }
        types.push(token_type);
    }
    types
}

#[tokio::test]
async fn test_mock_server_starts_and_listens() {
    let server = MockTdsServer::builder()
        .with_server_name("FidelityTest")
        .with_database("testdb")
        .build()
        .await
        .expect("Server should start");

    assert!(server.port() > 0, "Should have valid port");
    assert_eq!(server.host(), "127.0.0.1", "Should listen on localhost");
    assert_eq!(server.connection_count().await, 0);
    server.stop();
}

#[tokio::test]
async fn test_login_reports_database_packet_size_and_ack() {
    let server = MockTdsServer::builder()
        .with_server_name("FidelityTest")
        .with_database("testdb")
        .with_packet_size(8192)
        .build()
        .await
        .unwrap();

    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut peer = Peer::new(stream);
    peer.send(PacketType::PreLogin, &PreLogin::new().encode())
        .await
        .unwrap();
    let _ = peer.recv_message().await.unwrap();
    peer.send(PacketType::Tds7Login, &Login7::new().encode().unwrap())
        .await
        .unwrap();
    let (_, mut payload) = peer.recv_message().await.unwrap();

    assert_eq!(payload.get_u8(), TokenType::EnvChange as u8);
    assert_eq!(
        EnvChange::decode(&mut payload).unwrap(),
        EnvChange::Database {
            new: "testdb".into(),
            old: "master".into()
        }
    );
    assert_eq!(payload.get_u8(), TokenType::EnvChange as u8);
    assert_eq!(
        EnvChange::decode(&mut payload).unwrap(),
        EnvChange::PacketSize { new: 8192 }
    );
    assert_eq!(payload.get_u8(), TokenType::LoginAck as u8);
    assert_eq!(LoginAck::decode(&mut payload).unwrap().prog_name, "FidelityTest");
}

#[tokio::test]
async fn test_batch_response_by_sql_text() {
    let server = MockTdsServer::builder()
        .with_response(
            "SELECT name FROM t",
            MockResponse::rows(
                vec![MockColumn::nvarchar("name", 10)],
                vec![vec![ScalarValue::String("a".into())]],
            ),
        )
        .with_response("DELETE FROM t", MockResponse::affected(4))
        .build()
        .await
        .unwrap();
    let mut peer = logged_in(&server).await;

    peer.send(PacketType::SqlBatch, &encode_sql_batch("DELETE FROM t", 0))
        .await
        .unwrap();
    let (_, mut payload) = peer.recv_message().await.unwrap();
    assert_eq!(payload.get_u8(), TokenType::Done as u8);
    let done = Done::decode(&mut payload).unwrap();
    assert_eq!(done.count(), Some(4));

    peer.send(PacketType::SqlBatch, &encode_sql_batch("SELECT name FROM t", 0))
        .await
        .unwrap();
    let (_, payload) = peer.recv_message().await.unwrap();
    assert_eq!(payload[0], TokenType::ColMetaData as u8);

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].sql().as_deref(), Some("DELETE FROM t"));
}

#[tokio::test]
async fn test_rpc_script_is_consumed_in_order() {
    let server = MockTdsServer::builder()
        .with_rpc_response(MockResponse::Raw(
            TokenStream::new()
                .return_value_int(0, Some(9))
                .done_proc(DoneStatus::FINAL, 0)
                .build(),
        ))
        .with_rpc_response(MockResponse::error(8179, "Could not find prepared statement"))
        .build()
        .await
        .unwrap();
    let mut peer = logged_in(&server).await;

    let mut call = RpcCall::new(ProcId::Execute);
    call.int_param(ParamStatus::empty(), Some(9)).unwrap();
    let request = RpcRequest::new(call).encode(0);

    peer.send(PacketType::Rpc, &request).await.unwrap();
    let (_, first) = peer.recv_message().await.unwrap();
    assert_eq!(first[0], TokenType::ReturnValue as u8);

    peer.send(PacketType::Rpc, &request).await.unwrap();
    let (_, second) = peer.recv_message().await.unwrap();
    assert_eq!(
        token_types(second),
        vec![TokenType::Error, TokenType::ReturnStatus, TokenType::DoneProc]
    );

    // script exhausted: default response
    peer.send(PacketType::Rpc, &request).await.unwrap();
    let (_, third) = peer.recv_message().await.unwrap();
    assert_eq!(
        token_types(third),
        vec![TokenType::ReturnStatus, TokenType::DoneProc]
    );

    let calls = server.requests().await[0].rpc().unwrap().calls;
    assert_eq!(calls[0].proc_id, ProcId::Execute as u16);
    assert_eq!(calls[0].params[0].int(), Some(9));
}

#[tokio::test]
async fn test_split_responses() {
    let server = MockTdsServer::builder()
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .with_response_chunk(7)
        .build()
        .await
        .unwrap();
    let mut peer = logged_in(&server).await;

    peer.send(PacketType::SqlBatch, &encode_sql_batch("SELECT 1", 0))
        .await
        .unwrap();
    let packets = peer.recv_packets().await.unwrap();
    assert!(packets.len() > 1);
    assert!(packets.iter().all(|p| p.payload.len() <= 7));
}

#[tokio::test]
async fn test_attention_is_acknowledged() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let mut peer = logged_in(&server).await;

    peer.send(PacketType::Attention, &[]).await.unwrap();
    let (_, mut payload) = peer.recv_message().await.unwrap();
    assert_eq!(payload.get_u8(), TokenType::Done as u8);
    assert!(Done::decode(&mut payload)
        .unwrap()
        .status
        .contains(DoneStatus::ATTN));
}

#[tokio::test]
async fn test_multiple_mock_servers() {
    let a = MockTdsServer::builder().build().await.unwrap();
    let b = MockTdsServer::builder().build().await.unwrap();
    assert_ne!(a.port(), b.port());
}
