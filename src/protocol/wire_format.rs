//! Wire format encoding and decoding.
//!
//! Implements the 12-byte Gearman header:
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ Magic    │ Type     │ Length   │
//! │ 4 bytes  │ 4 bytes  │ 4 bytes  │
//! │ \0REQ/RES│ uint32 BE│ uint32 BE│
//! └──────────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use std::fmt;

use super::packet_type::PacketType;
use crate::error::{GearmanError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Default maximum payload size (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Separator between payload components.
pub const COMPONENT_SEPARATOR: u8 = 0;

/// Magic tag of request packets.
pub const REQ_MAGIC: [u8; 4] = *b"\0REQ";

/// Magic tag of response packets.
pub const RES_MAGIC: [u8; 4] = *b"\0RES";

/// Packet kind, carried by the 4-byte magic tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Magic {
    /// Sent by clients and workers to the job server.
    Request,
    /// Sent by the job server.
    Response,
}

impl Magic {
    /// The 4-byte tag on the wire.
    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        match self {
            Magic::Request => REQ_MAGIC,
            Magic::Response => RES_MAGIC,
        }
    }

    /// Parse a 4-byte tag.
    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self> {
        match bytes {
            REQ_MAGIC => Ok(Magic::Request),
            RES_MAGIC => Ok(Magic::Response),
            other => Err(GearmanError::BadMagic(other)),
        }
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Magic::Request => f.write_str("REQ"),
            Magic::Response => f.write_str("RES"),
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request or response.
    pub magic: Magic,
    /// Message type.
    pub packet_type: PacketType,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(magic: Magic, packet_type: PacketType, payload_length: u32) -> Self {
        Self {
            magic,
            packet_type,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use gearman_client::protocol::{Header, Magic, PacketType};
    ///
    /// let header = Header::new(Magic::Request, PacketType::EchoReq, 8);
    /// let bytes = header.encode();
    /// assert_eq!(&bytes[..4], b"\0REQ");
    /// assert_eq!(bytes.len(), 12);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.magic.to_bytes());
        buf[4..8].copy_from_slice(&self.packet_type.code().to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Fails with `Truncated` if the buffer is too short, `BadMagic` if the
    /// tag is neither `\0REQ` nor `\0RES`, and `UnknownType` for an unmapped
    /// type code.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(GearmanError::Truncated {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }
        let magic = Magic::from_bytes([buf[0], buf[1], buf[2], buf[3]])?;
        let code = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let packet_type = PacketType::try_from(code)?;
        Ok(Self {
            magic,
            packet_type,
            payload_length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Check the declared payload length against a limit.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(GearmanError::PayloadTooLarge {
                size: self.payload_length as usize,
                max: max_payload_size,
            });
        }
        Ok(())
    }

    /// Header plus payload length.
    #[inline]
    pub fn packet_len(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }
}

/// Read the payload length field without validating magic or type.
#[inline]
pub fn peek_payload_length(buf: &[u8]) -> Option<u32> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]))
}
