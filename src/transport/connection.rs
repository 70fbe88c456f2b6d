//! TCP connection to a job server with growable send/receive regions.
//!
//! All I/O is non-blocking: `write` and `read` each perform at most one
//! `try_write`/`try_read` and never wait. Callers wait with [`Connection::ready`]
//! and then drive the connection again.
//!
//! ```text
//! write(packet) ─► outbound region ──try_write──► socket
//! socket ──try_read──► chunk ─► inbound region ─► read() -> Packet
//! ```

use std::io;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tracing::trace;

use crate::config::{ConnectionConfig, ServerAddress};
use crate::error::{GearmanError, Result};
use crate::protocol::{Packet, PacketBuffer};

/// Headroom multiplier applied when the outbound region has to grow.
const GROWTH_FACTOR: usize = 10;

/// One TCP connection and its transport buffers.
pub struct Connection {
    stream: TcpStream,
    peer: String,
    outbound: BytesMut,
    chunk: Vec<u8>,
    inbound: PacketBuffer,
    max_payload_size: u32,
    eof: bool,
}

impl Connection {
    /// Connect to `addr`, bounded by the configured connect timeout.
    pub async fn connect(addr: &ServerAddress, config: &ConnectionConfig) -> Result<Self> {
        let connect = TcpStream::connect((addr.host.as_str(), addr.port));
        let stream = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| GearmanError::Timeout(format!("connection to {addr}")))??;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, addr.to_string(), config))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream, peer: String, config: &ConnectionConfig) -> Self {
        Self {
            stream,
            peer,
            outbound: BytesMut::with_capacity(config.initial_buffer_capacity),
            chunk: vec![0u8; config.read_chunk_size.max(1)],
            inbound: PacketBuffer::with_capacity_and_max_payload(
                config.initial_buffer_capacity,
                config.max_payload_size,
            ),
            max_payload_size: config.max_payload_size,
            eof: false,
        }
    }

    /// Peer address as given at connect time.
    #[inline]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue `packet` (if any) and write as much as the socket accepts now.
    ///
    /// Returns the number of bytes written by this call. A packet whose
    /// payload exceeds the configured maximum is rejected with
    /// `PayloadTooLarge` before anything is queued.
    pub fn write(&mut self, packet: Option<&Packet>) -> Result<usize> {
        if let Some(packet) = packet {
            self.check_outbound(packet)?;
            let len = packet.encoded_len();
            if self.outbound.capacity() - self.outbound.len() < len {
                self.outbound.reserve(len * GROWTH_FACTOR);
            }
            packet.encode_into(&mut self.outbound);
            trace!(peer = %self.peer, packet = %packet, buffered = self.outbound.len(), "queued");
        }

        if self.outbound.is_empty() {
            return Ok(0);
        }

        match self.stream.try_write(&self.outbound) {
            Ok(0) => Err(GearmanError::ConnectionClosed(self.peer.clone())),
            Ok(n) => {
                self.outbound.advance(n);
                trace!(peer = %self.peer, written = n, remaining = self.outbound.len(), "wrote");
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Check that `packet` may be queued on this connection.
    pub fn check_outbound(&self, packet: &Packet) -> Result<()> {
        packet.check_payload_size(self.max_payload_size)
    }

    /// Perform one non-blocking read and extract at most one packet.
    ///
    /// End of stream is reported as `ConnectionClosed` once no complete
    /// packet is left in the inbound region.
    pub fn read(&mut self) -> Result<Option<Packet>> {
        if !self.eof {
            match self.stream.try_read(&mut self.chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    self.inbound.extend(&self.chunk[..n]);
                    trace!(peer = %self.peer, read = n, buffered = self.inbound.len(), "read");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        match self.inbound.try_extract()? {
            Some(packet) => Ok(Some(packet)),
            None if self.eof => Err(GearmanError::ConnectionClosed(self.peer.clone())),
            None => Ok(None),
        }
    }

    /// Check if bytes are waiting to be written.
    #[inline]
    pub fn has_pending_writes(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Check if a complete packet is already buffered.
    #[inline]
    pub fn has_buffered_packet(&self) -> bool {
        self.inbound.has_complete_packet()
    }

    /// Readiness this connection currently cares about.
    pub fn interest(&self) -> Interest {
        if self.has_pending_writes() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Wait until the connection can make progress.
    ///
    /// Returns immediately when a complete packet is already buffered.
    pub async fn ready(&self) -> Result<()> {
        if self.eof || self.has_buffered_packet() {
            return Ok(());
        }
        self.stream.ready(self.interest()).await?;
        Ok(())
    }

    /// Write every queued byte, waiting for writability as needed.
    pub async fn flush(&mut self) -> Result<()> {
        while self.has_pending_writes() {
            self.stream.writable().await?;
            self.write(None)?;
        }
        Ok(())
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
