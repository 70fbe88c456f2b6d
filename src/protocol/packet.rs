//! Packet struct with typed accessors.
//!
//! A packet is an immutable `{magic, type, payload}` triple. The payload is a
//! sequence of NUL-separated components; every component but the last is an
//! identifier, the last is an opaque blob that may itself contain NUL bytes.
//!
//! ```text
//! SUBMIT_JOB payload:
//! ┌──────────┬────┬───────────┬────┬─────────────┐
//! │ function │ \0 │ unique id │ \0 │ data ...    │
//! └──────────┴────┴───────────┴────┴─────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use gearman_client::protocol::{Packet, PacketType};
//!
//! let packet = Packet::from_components(
//!     gearman_client::protocol::Magic::Request,
//!     PacketType::SubmitJob,
//!     &[b"reverse", b"id-1", b"Hello\0World"],
//! )
//! .unwrap();
//!
//! let parts = packet.components(3).unwrap();
//! assert_eq!(&parts[0][..], b"reverse");
//! assert_eq!(&parts[2][..], b"Hello\0World");
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::packet_type::PacketType;
use super::wire_format::{Header, Magic, COMPONENT_SEPARATOR, HEADER_SIZE};
use crate::error::{GearmanError, Result};

/// A complete Gearman packet.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    magic: Magic,
    packet_type: PacketType,
    payload: Bytes,
}

impl Packet {
    /// Create a packet from its parts.
    pub fn new(magic: Magic, packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            magic,
            packet_type,
            payload: payload.into(),
        }
    }

    /// Create a request packet.
    #[inline]
    pub fn request(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self::new(Magic::Request, packet_type, payload)
    }

    /// Create a response packet.
    #[inline]
    pub fn response(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self::new(Magic::Response, packet_type, payload)
    }

    /// Join components with single NUL separators.
    ///
    /// Only the final component may contain NUL bytes, and the joined payload
    /// must fit the header's 32-bit length field.
    pub fn from_components(
        magic: Magic,
        packet_type: PacketType,
        components: &[&[u8]],
    ) -> Result<Self> {
        let Some((last, leading)) = components.split_last() else {
            return Ok(Self::new(magic, packet_type, Bytes::new()));
        };

        let len = components.iter().map(|c| c.len()).sum::<usize>() + leading.len();
        if u32::try_from(len).is_err() {
            return Err(GearmanError::PayloadTooLarge {
                size: len,
                max: u32::MAX,
            });
        }
        let mut payload = BytesMut::with_capacity(len);
        for component in leading {
            if component.contains(&COMPONENT_SEPARATOR) {
                return Err(GearmanError::MalformedPayload(format!(
                    "{packet_type} identifier contains a NUL byte"
                )));
            }
            payload.put_slice(component);
            payload.put_u8(COMPONENT_SEPARATOR);
        }
        payload.put_slice(last);

        Ok(Self::new(magic, packet_type, payload.freeze()))
    }

    /// Split the payload into exactly `count` components.
    ///
    /// The first `count - 1` components end at the next NUL; the last one is
    /// the remainder of the payload, NUL bytes included. Fails with
    /// `MalformedPayload` if there are too few separators.
    pub fn components(&self, count: usize) -> Result<Vec<Bytes>> {
        let mut parts = Vec::with_capacity(count);
        if count == 0 {
            return Ok(parts);
        }

        let mut rest = self.payload.clone();
        for index in 0..count - 1 {
            let Some(pos) = rest.iter().position(|b| *b == COMPONENT_SEPARATOR) else {
                return Err(GearmanError::MalformedPayload(format!(
                    "{} expects {} components, found {}",
                    self.packet_type,
                    count,
                    index + 1
                )));
            };
            parts.push(rest.split_to(pos));
            rest.advance(1);
        }
        parts.push(rest);

        Ok(parts)
    }

    /// Packet kind.
    #[inline]
    pub fn magic(&self) -> Magic {
        self.magic
    }

    /// Message type.
    #[inline]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Clone of the payload (cheap, reference counted).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Check if this is a request.
    #[inline]
    pub fn is_request(&self) -> bool {
        self.magic == Magic::Request
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.magic == Magic::Response
    }

    /// Header describing this packet.
    ///
    /// Payloads longer than `u32::MAX` cannot be described; the connection
    /// rejects them with [`Packet::check_payload_size`] before encoding.
    pub fn header(&self) -> Header {
        Header::new(self.magic, self.packet_type, self.payload.len() as u32)
    }

    /// Fail with `PayloadTooLarge` if the payload exceeds `max`.
    pub fn check_payload_size(&self, max: u32) -> Result<()> {
        let size = self.payload.len();
        match u32::try_from(size) {
            Ok(len) if len <= max => Ok(()),
            _ => Err(GearmanError::PayloadTooLarge { size, max }),
        }
    }

    /// Size of the encoded packet.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append header and payload to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_slice(&self.header().encode());
        buf.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode one packet from the start of `buf`.
    ///
    /// Trailing bytes after the declared payload are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = Header::decode(buf)?;
        let total = header.packet_len();
        if buf.len() < total {
            return Err(GearmanError::Truncated {
                expected: total,
                actual: buf.len(),
            });
        }
        Ok(Self::new(
            header.magic,
            header.packet_type,
            Bytes::copy_from_slice(&buf[HEADER_SIZE..total]),
        ))
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("magic", &self.magic)
            .field("type", &self.packet_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} bytes)", self.magic, self.packet_type, self.payload.len())
    }
}
