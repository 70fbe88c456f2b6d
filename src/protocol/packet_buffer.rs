//! Packet buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. The buffer always
//! starts at a packet boundary: a header is only consumed together with its
//! full payload, so a packet is extractable iff
//! `len >= HEADER_SIZE && len >= HEADER_SIZE + payload_length`.
//!
//! # Example
//!
//! ```
//! use gearman_client::protocol::{Packet, PacketBuffer, PacketType};
//!
//! let bytes = Packet::response(PacketType::Noop, bytes::Bytes::new()).encode();
//! let mut buffer = PacketBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
//! let packets = buffer.push(&bytes[5..]).unwrap();
//! assert_eq!(packets.len(), 1);
//! ```

use bytes::BytesMut;

use super::packet::Packet;
use super::wire_format::{peek_payload_length, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::Result;

/// Default initial capacity of the inbound region.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete packets.
pub struct PacketBuffer {
    buffer: BytesMut,
    max_payload_size: u32,
}

impl PacketBuffer {
    /// Create a new packet buffer with default settings.
    pub fn new() -> Self {
        Self::with_capacity_and_max_payload(DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new packet buffer with custom capacity and max payload.
    pub fn with_capacity_and_max_payload(capacity: usize, max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete packets.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        self.extend(data);

        let mut packets = Vec::new();
        while let Some(packet) = self.try_extract()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Append data without extracting packets.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract exactly one packet if a complete one is buffered.
    ///
    /// Returns `Ok(None)` when more data is needed. Framing errors (bad
    /// magic, unknown type, oversized payload) are reported as soon as the
    /// header is buffered.
    pub fn try_extract(&mut self) -> Result<Option<Packet>> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::decode(&self.buffer[..HEADER_SIZE])?;
        header.validate(self.max_payload_size)?;

        if self.buffer.len() < header.packet_len() {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(header.packet_len());
        let payload = frame.split_off(HEADER_SIZE).freeze();

        Ok(Some(Packet::new(header.magic, header.packet_type, payload)))
    }

    /// Check if a complete packet is buffered, without validating it.
    pub fn has_complete_packet(&self) -> bool {
        peek_payload_length(&self.buffer)
            .is_some_and(|len| self.buffer.len() >= HEADER_SIZE + len as usize)
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}
