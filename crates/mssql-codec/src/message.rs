//! TDS message reassembly and chunking.
//!
//! TDS messages can span multiple packets. Inbound, [`MessageAssembler`]
//! buffers packet payloads until one arrives with `END_OF_MESSAGE`. Outbound,
//! [`chunk_message`] splits a serialized request into packets no larger than
//! the negotiated packet size.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

use crate::error::CodecError;
use crate::packet_codec::Packet;

/// A complete TDS message reassembled from one or more packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The packet type of this message.
    pub packet_type: PacketType,
    /// The complete message payload (all packets combined).
    pub payload: Bytes,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(packet_type: PacketType, payload: Bytes) -> Self {
        Self {
            packet_type,
            payload,
        }
    }

    /// Create a new message from a single packet.
    #[must_use]
    pub fn from_packet(packet: Packet) -> Self {
        Self::new(packet.header.packet_type, packet.payload)
    }

    /// Get the message payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reassembles multiple TDS packets into complete messages.
///
/// A single-packet message is passed through without copying.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    /// Buffer for accumulating packet payloads.
    buffer: BytesMut,
    /// Packet type of the message being assembled.
    packet_type: Option<PacketType>,
    /// Number of packets accumulated.
    packet_count: usize,
}

impl MessageAssembler {
    /// Create a new message assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet into the assembler.
    ///
    /// Returns `Some(Message)` if this packet completes a message, `None` if
    /// more packets are needed. Every packet of a message must carry the
    /// type of the first one.
    pub fn push(&mut self, packet: Packet) -> Result<Option<Message>, CodecError> {
        let is_eom = packet.is_end_of_message();

        tracing::trace!(
            packet_type = ?packet.header.packet_type,
            packet_count = self.packet_count + 1,
            buffer_len = self.buffer.len() + packet.payload.len(),
            is_eom,
            "assembling message"
        );

        match self.packet_type {
            None if is_eom => return Ok(Some(Message::from_packet(packet))),
            None => self.packet_type = Some(packet.header.packet_type),
            Some(expected) if expected != packet.header.packet_type => {
                self.buffer.clear();
                self.packet_type = None;
                self.packet_count = 0;
                return Err(CodecError::UnexpectedMessage {
                    expected,
                    actual: packet.header.packet_type,
                });
            }
            Some(_) => {}
        }

        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        if !is_eom {
            return Ok(None);
        }

        self.packet_count = 0;
        Ok(self
            .packet_type
            .take()
            .map(|packet_type| Message::new(packet_type, self.buffer.split().freeze())))
    }

    /// Check if the assembler has partial data buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }
}

/// Split a message payload into packets of at most `max_packet_size` bytes.
///
/// Only the last packet carries `END_OF_MESSAGE`. An empty payload still
/// produces one packet. Lengths and packet ids are filled in by the encoder.
#[must_use]
pub fn chunk_message(packet_type: PacketType, payload: &Bytes, max_packet_size: usize) -> Vec<Packet> {
    let max_payload = max_packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);
    let count = payload.len().div_ceil(max_payload).max(1);

    (0..count)
        .map(|i| {
            let start = i * max_payload;
            let end = (start + max_payload).min(payload.len());
            let status = if i + 1 == count {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            Packet::new(
                PacketHeader::new(packet_type, status, 0),
                payload.slice(start..end),
            )
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn make_packet(is_eom: bool, payload: &'static [u8]) -> Packet {
        let status = if is_eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let header = PacketHeader::new(PacketType::TabularResult, status, 0);
        Packet::new(header, Bytes::from_static(payload))
    }

    #[test]
    fn test_single_packet_message() {
        let mut assembler = MessageAssembler::new();

        let message = assembler
            .push(make_packet(true, b"hello"))
            .unwrap()
            .expect("should complete message");
        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut assembler = MessageAssembler::new();

        assert!(assembler.push(make_packet(false, b"hello ")).unwrap().is_none());
        assert!(assembler.has_partial());
        assert!(assembler.push(make_packet(false, b"world")).unwrap().is_none());

        let message = assembler
            .push(make_packet(true, b"!"))
            .unwrap()
            .expect("should complete message");

        assert_eq!(&message.payload[..], b"hello world!");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_mixed_packet_types_are_rejected() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(make_packet(false, b"rows")).unwrap().is_none());

        let header = PacketHeader::new(PacketType::PreLogin, PacketStatus::END_OF_MESSAGE, 0);
        let stray = Packet::new(header, Bytes::from_static(b"tls"));
        assert!(matches!(
            assembler.push(stray),
            Err(CodecError::UnexpectedMessage {
                expected: PacketType::TabularResult,
                actual: PacketType::PreLogin,
            })
        ));
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_chunk_sets_eom_on_last_only() {
        let payload = Bytes::from(vec![7u8; 1000]);
        let packets = chunk_message(PacketType::SqlBatch, &payload, 512);

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload.len(), 504);
        assert_eq!(packets[1].payload.len(), 496);
        assert_eq!(packets[0].header.status, PacketStatus::NORMAL);
        assert_eq!(packets[1].header.status, PacketStatus::END_OF_MESSAGE);
    }

    #[test]
    fn test_chunk_exact_multiple() {
        let payload = Bytes::from(vec![1u8; 504 * 3]);
        let packets = chunk_message(PacketType::Rpc, &payload, 512);
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.total_size() == 512));
        assert!(packets[2].is_end_of_message());
    }

    #[test]
    fn test_chunk_empty_payload() {
        let packets = chunk_message(PacketType::Attention, &Bytes::new(), 4096);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_end_of_message());
        assert!(packets[0].payload.is_empty());
    }

    #[test]
    fn test_chunk_then_assemble() {
        let payload = Bytes::from((0..5000u32).map(|i| i as u8).collect::<Vec<_>>());
        let mut assembler = MessageAssembler::new();
        let mut out = None;
        for packet in chunk_message(PacketType::TabularResult, &payload, 1024) {
            out = assembler.push(packet).unwrap();
        }
        assert_eq!(out.unwrap().payload, payload);
    }
}
