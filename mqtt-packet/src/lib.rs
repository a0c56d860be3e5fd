//! MQTT 3.1.1 control packet codec.
//!
//! The client engine treats this crate as a black box: it hands `encode::*`
//! a buffer and gets back a byte count, and hands `decode::deserialize_packet`
//! a buffer and gets back a [`Packet`] plus the number of bytes it consumed.
//! Nothing here knows about sockets, timers, or retransmission.

mod decode;
mod encode;
mod error;
mod packet;

pub use decode::{
    deserialize_ack, deserialize_connack, deserialize_packet, deserialize_publish,
    deserialize_suback, deserialize_unsuback, parse_fixed_header,
};
pub use encode::{
    serialize_ack, serialize_connect, serialize_disconnect, serialize_pingreq,
    serialize_publish, serialize_subscribe, serialize_unsubscribe,
};
pub use error::{DecodeError, EncodeError};
pub use packet::{
    AckPacketType, ConnectAck, ConnectOptions, LastWill, Packet, Publish, SubscribeAck,
    SubscribeStatus,
};

pub use mqtt_core::{ConnectReturnCode, PacketId, QoS};
