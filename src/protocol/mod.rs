//! Protocol module - wire format, packet types, and packet framing.
//!
//! This module implements the Gearman binary protocol:
//! - 12-byte header encoding/decoding
//! - Message type table (response and submission attributes)
//! - Packet struct with NUL-separated payload components
//! - Packet buffer for accumulating partial reads

mod packet;
mod packet_buffer;
mod packet_type;
mod wire_format;

pub use packet::Packet;
pub use packet_buffer::{PacketBuffer, DEFAULT_BUFFER_CAPACITY};
pub use packet_type::{JobPriority, PacketType};
pub use wire_format::{
    peek_payload_length, Header, Magic, COMPONENT_SEPARATOR, DEFAULT_MAX_PAYLOAD_SIZE,
    HEADER_SIZE, REQ_MAGIC, RES_MAGIC,
};
