//! Driver tests: pipelined requests, FIFO response matching, multi-round-trip
//! commands and connection loss.

#![allow(clippy::unwrap_used)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::FutureExt;
use mssql_codec::{
    CodecError, Command, Connection, Driver, DriverHandle, PreparedStatement, Response,
    SessionState,
};
use mssql_testing::peer::Peer;
use mssql_testing::rpc::{RpcRequestView, SqlBatchView};
use mssql_testing::tokens::{MockColumn, ScalarValue, TokenStream};
use mssql_types::SqlValue;
use tds_protocol::{DoneStatus, PacketType, ProcId};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start() -> (DriverHandle, Peer<DuplexStream>, JoinHandle<()>) {
    init_tracing();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (driver, handle) = Driver::new(Connection::new(client), SessionState::new(512), 16);
    let task = tokio::spawn(driver.run());
    (handle, Peer::new(server), task)
}

async fn expect_batch(peer: &mut Peer<DuplexStream>) -> String {
    let (packet_type, payload) = peer.recv_message().await.unwrap();
    assert_eq!(packet_type, PacketType::SqlBatch);
    SqlBatchView::parse(&payload).unwrap().sql
}

async fn expect_rpc(peer: &mut Peer<DuplexStream>) -> RpcRequestView {
    let (packet_type, payload) = peer.recv_message().await.unwrap();
    assert_eq!(packet_type, PacketType::Rpc);
    RpcRequestView::parse(&payload).unwrap()
}

fn scalar(value: i32) -> Bytes {
    TokenStream::new()
        .col_metadata(&[MockColumn::int("v")])
        .row(&[ScalarValue::Int(value)])
        .done(DoneStatus::COUNT, 1)
        .build()
}

fn proc_done() -> Bytes {
    TokenStream::new()
        .return_status(0)
        .done_proc(DoneStatus::FINAL, 0)
        .build()
}

fn query(response: Response) -> mssql_codec::QueryResult {
    match response {
        Response::Query(result) => result,
        other => unreachable!("expected a query result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pipelined_requests_complete_in_send_order() {
    let (handle, mut peer, _task) = start();

    let first = handle.submit(Command::sql_batch("SELECT 1")).await.unwrap();
    let second = handle.submit(Command::sql_batch("SELECT 2")).await.unwrap();
    let third = handle.submit(Command::sql_batch("DELETE FROM t")).await.unwrap();

    // all three arrive before any response is sent
    assert_eq!(expect_batch(&mut peer).await, "SELECT 1");
    assert_eq!(expect_batch(&mut peer).await, "SELECT 2");
    assert_eq!(expect_batch(&mut peer).await, "DELETE FROM t");

    // the first response spans many packets
    peer.send_split(PacketType::TabularResult, &scalar(1), 5)
        .await
        .unwrap();
    let error = TokenStream::new()
        .error(208, 16, "Invalid object name 't2'.")
        .done(DoneStatus::ERROR, 0)
        .build();
    peer.send(PacketType::TabularResult, &error).await.unwrap();
    let count = TokenStream::new().done(DoneStatus::COUNT, 3).build();
    peer.send(PacketType::TabularResult, &count).await.unwrap();

    let rows = query(first.wait().await.unwrap());
    assert_eq!(rows.rows()[0].get::<i32>(0).unwrap(), 1);
    match second.wait().await {
        Err(CodecError::Server(e)) => assert_eq!(e.number, 208),
        other => unreachable!("expected a server error, got {other:?}"),
    }
    assert_eq!(query(third.wait().await.unwrap()).rows_affected(), 3);
}

#[tokio::test]
async fn test_empty_batch_writes_nothing() {
    let (handle, mut peer, _task) = start();
    let stmt = PreparedStatement::new("INSERT INTO t VALUES (@P1)");

    let result = handle.execute(Command::execute_batch(stmt, Vec::new())).await;
    assert!(matches!(result, Err(CodecError::EmptyBatch)));

    let next = handle.submit(Command::sql_batch("SELECT 1")).await.unwrap();
    assert_eq!(expect_batch(&mut peer).await, "SELECT 1");
    peer.send(PacketType::TabularResult, &scalar(1)).await.unwrap();
    assert!(next.wait().await.is_ok());
}

#[tokio::test]
async fn test_batch_follow_up_precedes_later_requests() {
    let (handle, mut peer, _task) = start();
    let stmt = PreparedStatement::new("INSERT INTO t VALUES (@P1)");
    let sets = vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]];

    let batch = handle
        .submit(Command::execute_batch(stmt.clone(), sets))
        .await
        .unwrap();
    let later = handle.submit(Command::sql_batch("SELECT 9")).await.unwrap();

    let prepare = expect_rpc(&mut peer).await;
    assert_eq!(prepare.calls[0].proc_id, ProcId::PrepExec as u16);
    let prepared = TokenStream::new()
        .return_value_int(1, Some(31))
        .done_in_proc(DoneStatus::COUNT, 1)
        .done_proc(DoneStatus::FINAL, 0)
        .build();
    peer.send(PacketType::TabularResult, &prepared).await.unwrap();

    let execute = expect_rpc(&mut peer).await;
    assert_eq!(execute.calls.len(), 1);
    assert_eq!(execute.calls[0].proc_id, ProcId::Execute as u16);
    assert_eq!(execute.calls[0].params[0].int(), Some(31));
    assert_eq!(execute.calls[0].params[1].int(), Some(2));
    let executed = TokenStream::new()
        .done_in_proc(DoneStatus::COUNT, 1)
        .done_proc(DoneStatus::FINAL, 0)
        .build();
    peer.send(PacketType::TabularResult, &executed).await.unwrap();

    assert_eq!(expect_batch(&mut peer).await, "SELECT 9");
    peer.send(PacketType::TabularResult, &scalar(9)).await.unwrap();

    assert_eq!(query(batch.wait().await.unwrap()).rows_affected(), 2);
    assert!(later.wait().await.is_ok());
    assert_eq!(stmt.handle(), 31);
}

#[tokio::test]
async fn test_pipelined_executions_share_one_handle() {
    let (handle, mut peer, _task) = start();
    let stmt = PreparedStatement::new("SELECT @P1");

    let first = handle
        .submit(Command::execute(stmt.clone(), vec![SqlValue::Int(1)]))
        .await
        .unwrap();
    let second = handle
        .submit(Command::execute(stmt.clone(), vec![SqlValue::Int(2)]))
        .await
        .unwrap();

    let prepare = expect_rpc(&mut peer).await;
    assert_eq!(prepare.calls[0].proc_id, ProcId::PrepExec as u16);
    let prepared = TokenStream::new()
        .col_metadata(&[MockColumn::int("v")])
        .row(&[ScalarValue::Int(1)])
        .done_in_proc(DoneStatus::COUNT, 1)
        .return_value_int(1, Some(12))
        .done_proc(DoneStatus::FINAL, 0)
        .build();
    peer.send(PacketType::TabularResult, &prepared).await.unwrap();

    // written only once the handle is known
    let execute = expect_rpc(&mut peer).await;
    assert_eq!(execute.calls[0].proc_id, ProcId::Execute as u16);
    assert_eq!(execute.calls[0].params[0].int(), Some(12));
    let executed = TokenStream::new()
        .col_metadata(&[MockColumn::int("v")])
        .row(&[ScalarValue::Int(2)])
        .done_in_proc(DoneStatus::COUNT, 1)
        .done_proc(DoneStatus::FINAL, 0)
        .build();
    peer.send(PacketType::TabularResult, &executed).await.unwrap();

    assert_eq!(query(first.wait().await.unwrap()).rows().len(), 1);
    assert_eq!(query(second.wait().await.unwrap()).rows().len(), 1);
    assert_eq!(stmt.handle(), 12);
}

#[tokio::test]
async fn test_cursor_lifecycle() {
    let (handle, mut peer, _task) = start();

    let page = handle
        .submit(Command::cursor_query(1, "SELECT id FROM t", Vec::new(), 2))
        .await
        .unwrap();

    let open = expect_rpc(&mut peer).await;
    assert_eq!(open.calls[0].proc_id, ProcId::CursorPrepExec as u16);
    let opened = TokenStream::new()
        .col_metadata(&[MockColumn::int("id"), MockColumn::int("ROWSTAT")])
        .return_value_int(1, Some(10))
        .return_value_int(2, Some(20))
        .return_value_int(7, Some(3))
        .return_status(0)
        .done_proc(DoneStatus::FINAL, 0)
        .build();
    peer.send(PacketType::TabularResult, &opened).await.unwrap();

    let fetch = expect_rpc(&mut peer).await;
    assert_eq!(fetch.calls[0].proc_id, ProcId::CursorFetch as u16);
    assert_eq!(fetch.calls[0].params[0].int(), Some(20));
    let rows = TokenStream::new()
        .no_metadata()
        .with_columns(&[MockColumn::int("id"), MockColumn::int("ROWSTAT")])
        .row(&[ScalarValue::Int(1), ScalarValue::Int(1)])
        .row(&[ScalarValue::Int(2), ScalarValue::Int(1)])
        .done_proc(DoneStatus::FINAL, 0)
        .build();
    peer.send(PacketType::TabularResult, &rows).await.unwrap();

    let Response::Cursor { result, has_more } = page.wait().await.unwrap() else {
        unreachable!("expected a cursor page");
    };
    assert!(has_more);
    assert_eq!(result.rows().len(), 2);

    let next = handle
        .submit(Command::cursor_query(1, "SELECT id FROM t", Vec::new(), 2))
        .await
        .unwrap();
    assert_eq!(
        expect_rpc(&mut peer).await.calls[0].proc_id,
        ProcId::CursorFetch as u16
    );
    let last = TokenStream::new()
        .no_metadata()
        .with_columns(&[MockColumn::int("id"), MockColumn::int("ROWSTAT")])
        .row(&[ScalarValue::Int(3), ScalarValue::Int(1)])
        .done_proc(DoneStatus::FINAL, 0)
        .build();
    peer.send(PacketType::TabularResult, &last).await.unwrap();
    let Response::Cursor { result, has_more } = next.wait().await.unwrap() else {
        unreachable!("expected a cursor page");
    };
    assert!(!has_more);
    assert_eq!(result.rows()[0].get::<i32>(0).unwrap(), 3);

    let close = handle.submit(Command::close_cursor(1)).await.unwrap();
    let request = expect_rpc(&mut peer).await;
    assert_eq!(request.calls.len(), 2);
    assert_eq!(request.calls[0].proc_id, ProcId::CursorClose as u16);
    assert_eq!(request.calls[1].proc_id, ProcId::CursorUnprepare as u16);
    peer.send(PacketType::TabularResult, &proc_done()).await.unwrap();
    assert!(matches!(close.wait().await, Ok(Response::Closed)));

    // closing again has nothing to release
    assert!(matches!(
        handle.execute(Command::close_cursor(1)).await,
        Ok(Response::Closed)
    ));
}

#[tokio::test]
async fn test_connection_loss_fails_every_queued_command() {
    let (handle, mut peer, task) = start();

    let first = handle.submit(Command::sql_batch("SELECT 1")).await.unwrap();
    let second = handle.submit(Command::sql_batch("SELECT 2")).await.unwrap();
    expect_batch(&mut peer).await;
    expect_batch(&mut peer).await;

    // half a response, then the peer goes away
    peer.send_partial(PacketType::TabularResult, &[0x81, 0x01])
        .await
        .unwrap();
    drop(peer);

    assert!(matches!(first.wait().await, Err(CodecError::ConnectionClosed)));
    assert!(matches!(second.wait().await, Err(CodecError::ConnectionClosed)));
    task.await.unwrap();

    assert!(handle.is_closed());
    assert!(matches!(
        handle.execute(Command::sql_batch("SELECT 3")).await,
        Err(CodecError::ConnectionClosed)
    ));
}

/// Duplex transport whose writes fail once `broken` is set.
struct BreakableWrites {
    inner: DuplexStream,
    broken: Arc<AtomicBool>,
}

impl AsyncRead for BreakableWrites {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for BreakableWrites {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[tokio::test]
async fn test_failed_write_fails_older_commands_first() {
    init_tracing();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let broken = Arc::new(AtomicBool::new(false));
    let transport = BreakableWrites {
        inner: client,
        broken: Arc::clone(&broken),
    };
    let (driver, handle) = Driver::new(Connection::new(transport), SessionState::new(512), 16);
    let task = tokio::spawn(driver.run());
    let mut peer = Peer::new(server);

    let first = handle.submit(Command::sql_batch("SELECT 1")).await.unwrap();
    assert_eq!(expect_batch(&mut peer).await, "SELECT 1");

    broken.store(true, Ordering::SeqCst);
    let second = handle.submit(Command::sql_batch("SELECT 2")).await.unwrap();

    assert!(matches!(second.wait().await, Err(CodecError::ConnectionClosed)));
    // the older command was already answered when the newer one was
    assert!(matches!(
        first.wait().now_or_never(),
        Some(Err(CodecError::ConnectionClosed))
    ));
    task.await.unwrap();
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_close_connection_shuts_transport() {
    let (handle, mut peer, task) = start();

    let response = handle.execute(Command::close_connection()).await.unwrap();
    assert!(matches!(response, Response::Closed));
    assert_eq!(
        peer.recv_message().await.unwrap_err().kind(),
        std::io::ErrorKind::UnexpectedEof
    );
    task.await.unwrap();
}

#[tokio::test]
async fn test_dropping_handles_stops_driver() {
    let (handle, _peer, task) = start();
    drop(handle);
    task.await.unwrap();
}
