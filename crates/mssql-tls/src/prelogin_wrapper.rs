//! PRELOGIN tunnelling for the TLS handshake.
//!
//! Before the encrypted transport is in place, TLS handshake records travel
//! as the payload of ordinary PRELOGIN packets. [`TlsPreloginWrapper`] sits
//! between rustls and the socket for that phase: outbound records are framed
//! into PRELOGIN packets on flush, inbound PRELOGIN packets are stripped of
//! their headers. Once [`handshake_complete`](TlsPreloginWrapper::handshake_complete)
//! is called the wrapper passes bytes through untouched.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use tds_protocol::packet::{
    DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType,
    clamp_packet_size,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream adapter that frames TLS handshake bytes as PRELOGIN packets.
pub struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,
    packet_size: usize,

    header: [u8; PACKET_HEADER_SIZE],
    header_pos: usize,
    read_remaining: usize,

    // handshake bytes written by rustls but not yet framed
    pending: BytesMut,
    // framed packets waiting for the socket
    framed: BytesMut,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap `stream` with the default packet size.
    pub fn new(stream: S) -> Self {
        Self::with_packet_size(stream, DEFAULT_PACKET_SIZE)
    }

    /// Wrap `stream`, splitting outbound handshake data into packets of at
    /// most `packet_size` bytes.
    pub fn with_packet_size(stream: S, packet_size: usize) -> Self {
        Self {
            stream,
            pending_handshake: true,
            packet_size: clamp_packet_size(packet_size),
            header: [0; PACKET_HEADER_SIZE],
            header_pos: 0,
            read_remaining: 0,
            pending: BytesMut::new(),
            framed: BytesMut::new(),
        }
    }

    /// Stop framing; all further traffic passes straight through.
    pub fn handshake_complete(&mut self) {
        tracing::trace!("PRELOGIN tunnel removed");
        self.pending_handshake = false;
    }

    /// Whether handshake framing is still active.
    #[must_use]
    pub fn is_tunnelling(&self) -> bool {
        self.pending_handshake
    }

    /// Reference to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutable reference to the wrapped stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Return the wrapped stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn frame_pending(&mut self) {
        let max_payload = self.packet_size - PACKET_HEADER_SIZE;
        let mut packet_id: u8 = 1;
        while !self.pending.is_empty() {
            let take = self.pending.len().min(max_payload);
            let status = if take == self.pending.len() {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            // take <= max_payload keeps the total within u16
            let length = (take + PACKET_HEADER_SIZE) as u16;
            PacketHeader::new(PacketType::PreLogin, status, length)
                .with_packet_id(packet_id)
                .encode(&mut self.framed);
            self.framed.extend_from_slice(&self.pending.split_to(take));
            packet_id = packet_id.wrapping_add(1);
        }
        tracing::trace!(len = self.framed.len(), "framed TLS handshake data");
    }
}

impl<S: AsyncRead + Unpin> TlsPreloginWrapper<S> {
    /// Read the next packet header. `Ok(false)` means clean end of stream.
    fn poll_header(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<bool>> {
        while self.header_pos < PACKET_HEADER_SIZE {
            let mut dst = ReadBuf::new(&mut self.header[self.header_pos..]);
            ready!(Pin::new(&mut self.stream).poll_read(cx, &mut dst))?;
            let n = dst.filled().len();
            if n == 0 {
                if self.header_pos == 0 {
                    return Poll::Ready(Ok(false));
                }
                return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
            }
            self.header_pos += n;
        }

        let header = PacketHeader::decode(&mut &self.header[..])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if header.packet_type != PacketType::PreLogin {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "expected PRELOGIN packet during TLS handshake, got {:?}",
                    header.packet_type
                ),
            )));
        }
        self.read_remaining = header.payload_length();
        tracing::trace!(len = self.read_remaining, "unwrapping TLS handshake packet");
        Poll::Ready(Ok(true))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        // skip over empty packets
        while this.read_remaining == 0 {
            this.header_pos = 0;
            if !ready!(this.poll_header(cx))? {
                return Poll::Ready(Ok(()));
            }
        }

        let want = this.read_remaining.min(buf.remaining());
        if want == 0 {
            return Poll::Ready(Ok(()));
        }
        let dst = buf.initialize_unfilled_to(want);
        let mut limited = ReadBuf::new(dst);
        ready!(Pin::new(&mut this.stream).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
        }
        buf.advance(n);
        this.read_remaining -= n;
        if this.read_remaining == 0 {
            this.header_pos = 0;
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        this.pending.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending.is_empty() {
            this.frame_pending();
        }
        while this.framed.has_remaining() {
            let n = ready!(Pin::new(&mut this.stream).poll_write(cx, &this.framed))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.framed.advance(n);
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl<S> std::fmt::Debug for TlsPreloginWrapper<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsPreloginWrapper")
            .field("pending_handshake", &self.pending_handshake)
            .field("packet_size", &self.packet_size)
            .field("read_remaining", &self.read_remaining)
            .finish_non_exhaustive()
    }
}
