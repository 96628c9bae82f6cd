//! Split I/O connection.
//!
//! The transport is split into read and write halves so the driver can wait
//! for the next response while still writing pipelined requests.

use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::MAX_PACKET_SIZE;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::command::{Command, Encoded, Outbound, Response, Step};
use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{Message, MessageAssembler, chunk_message};
use crate::packet_codec::TdsCodec;
use crate::session::SessionState;

/// A TDS connection over a byte stream.
///
/// # Example
///
/// ```rust,ignore
/// use mssql_codec::{Command, Connection, SessionState};
/// use tokio::net::TcpStream;
///
/// let stream = TcpStream::connect("localhost:1433").await?;
/// let mut conn = Connection::new(stream);
/// let mut session = SessionState::default();
/// let response = conn
///     .run(&mut Command::pre_login(PreLogin::new()), &mut session)
///     .await?;
/// ```
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: PacketReader<ReadHalf<T>>,
    writer: PacketWriter<WriteHalf<T>>,
    assembler: MessageAssembler,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a connection over a transport.
    ///
    /// Inbound packets may be as large as the protocol allows; outbound
    /// packets follow the size passed to [`send`](Self::send).
    pub fn new(transport: T) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: PacketReader::with_codec(
                read_half,
                TdsCodec::new().with_max_packet_size(MAX_PACKET_SIZE),
            ),
            writer: PacketWriter::new(write_half),
            assembler: MessageAssembler::new(),
        }
    }

    /// Read the next complete message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream between messages.
    /// Cancel safe: packets of a partially received message stay buffered.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        loop {
            match self.reader.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.assembler.push(packet)? {
                        tracing::trace!(
                            packet_type = ?message.packet_type,
                            len = message.len(),
                            "message received"
                        );
                        return Ok(Some(message));
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if self.assembler.has_partial() {
                        return Err(CodecError::ConnectionClosed);
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Write a message as packets of at most `packet_size` bytes and flush.
    pub async fn send(&mut self, outbound: &Outbound, packet_size: usize) -> Result<(), CodecError> {
        self.writer.codec_mut().set_max_packet_size(packet_size);
        let max = self.writer.codec().max_packet_size();
        let packets = chunk_message(outbound.packet_type, &outbound.payload, max);
        tracing::trace!(
            packet_type = ?outbound.packet_type,
            len = outbound.payload.len(),
            packets = packets.len(),
            "sending message"
        );
        for packet in packets {
            self.writer.feed(packet).await?;
        }
        self.writer.flush().await
    }

    /// Flush and shut the write half down.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.writer.close().await
    }

    /// Send `command` and drive it to completion.
    pub async fn run(
        &mut self,
        command: &mut Command,
        session: &mut SessionState,
    ) -> Result<Response, CodecError> {
        match command.encode(session) {
            Encoded::Local(result) => result,
            Encoded::Send(outbound) => {
                self.send(&outbound, session.packet_size).await?;
                self.receive(command, session).await
            }
        }
    }

    /// Drive a command whose request has already been sent.
    pub async fn receive(
        &mut self,
        command: &mut Command,
        session: &mut SessionState,
    ) -> Result<Response, CodecError> {
        loop {
            let message = self
                .read_message()
                .await?
                .ok_or(CodecError::ConnectionClosed)?;
            match command.on_message(message, session) {
                Step::Pending => {}
                Step::Send(outbound) => self.send(&outbound, session.packet_size).await?,
                Step::Done(result) => return result,
            }
        }
    }

    /// Reunite the halves and return the transport.
    ///
    /// Bytes already buffered by the reader are lost.
    pub fn into_inner(self) -> T
    where
        T: Unpin,
    {
        self.reader.into_inner().unsplit(self.writer.into_inner())
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("has_partial_message", &self.assembler.has_partial())
            .field("max_packet_size", &self.writer.codec().max_packet_size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mssql_testing::peer::{Peer, assemble};
    use mssql_testing::tokens::{MockColumn, ScalarValue, TokenStream};
    use tds_protocol::{DoneStatus, PacketType};

    #[tokio::test]
    async fn test_large_request_is_chunked() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(client);
        let mut peer = Peer::new(server);

        let payload = Bytes::from(vec![7u8; 1500]);
        conn.send(&Outbound::new(PacketType::SqlBatch, payload.clone()), 512)
            .await
            .unwrap();

        let packets = peer.recv_packets().await.unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.header.length as usize <= 512));
        assert!(packets[2].header.is_end_of_message());
        assert!(!packets[0].header.is_end_of_message());
        let (packet_type, received) = assemble(&packets);
        assert_eq!(packet_type, PacketType::SqlBatch);
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_run_reads_split_response() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(client);
        let mut peer = Peer::new(server);
        let mut session = SessionState::default();

        let server_task = tokio::spawn(async move {
            let _ = peer.recv_message().await.unwrap();
            let payload = TokenStream::new()
                .col_metadata(&[MockColumn::int("n")])
                .row(&[ScalarValue::Int(1)])
                .row(&[ScalarValue::Int(2)])
                .done(DoneStatus::COUNT, 2)
                .build();
            peer.send_split(PacketType::TabularResult, &payload, 9)
                .await
                .unwrap();
        });

        let response = conn
            .run(&mut Command::sql_batch("SELECT n"), &mut session)
            .await
            .unwrap();
        let Response::Query(result) = response else {
            unreachable!("expected rows");
        };
        assert_eq!(result.rows().len(), 2);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_mid_message_is_connection_closed() {
        let (client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(client);
        let mut peer = Peer::new(server);

        peer.send_partial(PacketType::TabularResult, &[0xFD, 0, 0]).await.unwrap();
        drop(peer);

        assert!(matches!(
            conn.read_message().await,
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(client);
        drop(server);
        assert!(conn.read_message().await.unwrap().is_none());
    }
}
