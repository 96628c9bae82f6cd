//! Packet-level server peer.
//!
//! [`Peer`] plays the server side of an in-memory transport (usually one
//! half of `tokio::io::duplex`) and works on raw packets, so tests can check
//! exactly how a client chunked its requests and feed it split or truncated
//! responses.

use std::io;

use bytes::{Bytes, BytesMut};
use tds_protocol::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One packet as read off the wire.
#[derive(Debug, Clone)]
pub struct RawPacket {
    /// Decoded header.
    pub header: PacketHeader,
    /// Payload following the header.
    pub payload: Bytes,
}

/// Concatenate packet payloads into one message.
///
/// The message type is taken from the first packet.
#[must_use]
pub fn assemble(packets: &[RawPacket]) -> (PacketType, Bytes) {
    let packet_type = packets
        .first()
        .map_or(PacketType::TabularResult, |p| p.header.packet_type);
    let mut payload = BytesMut::new();
    for packet in packets {
        payload.extend_from_slice(&packet.payload);
    }
    (packet_type, payload.freeze())
}

/// Split `payload` into packets carrying at most `chunk` payload bytes.
///
/// Only the last packet has END_OF_MESSAGE set; an empty payload still
/// produces one packet.
#[must_use]
pub fn packetize(packet_type: PacketType, payload: &[u8], chunk: usize) -> Bytes {
    let chunk = chunk.max(1);
    let mut out = BytesMut::new();
    let mut chunks: Vec<&[u8]> = payload.chunks(chunk).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    let last = chunks.len() - 1;
    for (i, body) in chunks.into_iter().enumerate() {
        let status = if i == last {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let mut header = PacketHeader::new(
            packet_type,
            status,
            (PACKET_HEADER_SIZE + body.len()) as u16,
        );
        header.packet_id = (i + 1) as u8;
        header.encode(&mut out);
        out.extend_from_slice(body);
    }
    out.freeze()
}

/// Server side of a client transport.
#[derive(Debug)]
pub struct Peer<S> {
    stream: S,
}

impl<S> Peer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap the server half of a transport.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Read one packet.
    pub async fn recv_packet(&mut self) -> io::Result<RawPacket> {
        let mut header_buf = [0u8; PACKET_HEADER_SIZE];
        self.stream.read_exact(&mut header_buf).await?;

        let header = PacketHeader::decode(&mut &header_buf[..])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut payload = vec![0u8; header.payload_length()];
        self.stream.read_exact(&mut payload).await?;
        Ok(RawPacket {
            header,
            payload: Bytes::from(payload),
        })
    }

    /// Read packets up to and including the one marked END_OF_MESSAGE.
    pub async fn recv_packets(&mut self) -> io::Result<Vec<RawPacket>> {
        let mut packets = Vec::new();
        loop {
            let packet = self.recv_packet().await?;
            let last = packet.header.is_end_of_message();
            packets.push(packet);
            if last {
                return Ok(packets);
            }
        }
    }

    /// Read one complete message.
    pub async fn recv_message(&mut self) -> io::Result<(PacketType, Bytes)> {
        let packets = self.recv_packets().await?;
        Ok(assemble(&packets))
    }

    /// Send a message in a single packet.
    pub async fn send(&mut self, packet_type: PacketType, payload: &[u8]) -> io::Result<()> {
        self.send_split(packet_type, payload, payload.len()).await
    }

    /// Send a message split into packets of `chunk` payload bytes.
    pub async fn send_split(
        &mut self,
        packet_type: PacketType,
        payload: &[u8],
        chunk: usize,
    ) -> io::Result<()> {
        let wire = packetize(packet_type, payload, chunk);
        self.stream.write_all(&wire).await?;
        self.stream.flush().await
    }

    /// Send a packet without END_OF_MESSAGE.
    pub async fn send_partial(&mut self, packet_type: PacketType, payload: &[u8]) -> io::Result<()> {
        let header = PacketHeader::new(
            packet_type,
            PacketStatus::NORMAL,
            (PACKET_HEADER_SIZE + payload.len()) as u16,
        );
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
        header.encode(&mut buf);
        buf.extend_from_slice(payload);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await
    }

    /// Write raw bytes.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}
