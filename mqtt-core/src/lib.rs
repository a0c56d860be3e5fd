//! Wire-level vocabulary shared by the MQTT 3.1.1 codec (`mqtt-packet`) and
//! the client engine (`mqtt-client`): the fixed header, the packet type and
//! QoS enums, the connect flags/return codes, and the remaining-length
//! varint used by both the codec and the engine's framing layer.
//!
//! This crate does no I/O and performs no allocation beyond what a caller's
//! buffer provides.

mod packet;
mod varint;

pub use packet::{
    ConnectAckFlags, ConnectFlags, ConnectReturnCode, FixedHeader, PacketId, PacketType, QoS,
};
pub use varint::{decode_remaining_length, encode_remaining_length, VarintError};

/// MQTT imposes a maximum payload size of 268,435,455 bytes: the largest
/// value the four-byte remaining-length varint can represent.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Protocol name/level bytes for the MQTT 3.1.1 CONNECT variable header.
pub const PROTOCOL_NAME: &[u8] = b"\x00\x04MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;
