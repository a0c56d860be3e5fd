use std::convert::TryFrom;

use bitflags::bitflags;
use derive_more::Display;
use num_enum::TryFromPrimitive;

/// Packet Identifier.
///
/// The variable header component of many of the Control Packet types
/// includes a 2 byte Packet Identifier field. Never zero.
pub type PacketId = u16;

/// MQTT Control Packet type, the high nibble of the fixed header's first byte.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, TryFromPrimitive)]
pub enum PacketType {
    Connect = 1,
    ConnectAck = 2,
    Publish = 3,
    PublishAck = 4,
    PublishReceived = 5,
    PublishRelease = 6,
    PublishComplete = 7,
    Subscribe = 8,
    SubscribeAck = 9,
    Unsubscribe = 10,
    UnsubscribeAck = 11,
    PingRequest = 12,
    PingResponse = 13,
    Disconnect = 14,
}

/// Fixed header common to every MQTT Control Packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// Flags specific to each Control Packet type (DUP/QoS/RETAIN for PUBLISH).
    pub flags: u8,
    /// Number of bytes remaining within the packet, excluding the fixed header itself.
    pub remaining_length: usize,
}

impl FixedHeader {
    /// Packs the type/flags nibbles into the header's first byte.
    pub fn first_byte(&self) -> u8 {
        ((self.packet_type as u8) << 4) | (self.flags & 0x0f)
    }
}

/// Quality of Service levels.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive)]
pub enum QoS {
    /// At most once delivery: fire and forget, no packet id, no ack.
    #[display(fmt = "at-most-once")]
    AtMostOnce = 0,
    /// At least once delivery: PUBLISH carries a packet id, acked by PUBACK.
    #[display(fmt = "at-least-once")]
    AtLeastOnce = 1,
    /// Exactly once delivery: the PUBLISH/PUBREC/PUBREL/PUBCOMP handshake.
    #[display(fmt = "exactly-once")]
    ExactlyOnce = 2,
}

impl Default for QoS {
    fn default() -> Self {
        QoS::AtMostOnce
    }
}

bitflags! {
    /// CONNECT variable header flags.
    #[derive(Default)]
    pub struct ConnectFlags: u8 {
        const USERNAME      = 0b1000_0000;
        const PASSWORD      = 0b0100_0000;
        const WILL_RETAIN   = 0b0010_0000;
        const WILL_QOS      = 0b0001_1000;
        const WILL          = 0b0000_0100;
        const CLEAN_SESSION = 0b0000_0010;
    }
}

const WILL_QOS_SHIFT: u8 = 3;

impl ConnectFlags {
    pub fn with_will_qos(self, qos: QoS) -> Self {
        (self & !Self::WILL_QOS) | Self::from_bits_truncate((qos as u8) << WILL_QOS_SHIFT)
    }

    pub fn will_qos(self) -> Option<QoS> {
        QoS::try_from((self & Self::WILL_QOS).bits() >> WILL_QOS_SHIFT).ok()
    }
}

bitflags! {
    /// CONNACK variable header flags.
    #[derive(Default)]
    pub struct ConnectAckFlags: u8 {
        const SESSION_PRESENT = 0b0000_0001;
    }
}

/// CONNACK return code (MQTT 3.1.1 §3.2.2.3).
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive, Display)]
pub enum ConnectReturnCode {
    #[display(fmt = "Connection Accepted")]
    ConnectionAccepted = 0,
    #[display(fmt = "Connection Refused, unacceptable protocol version")]
    UnacceptableProtocolVersion = 1,
    #[display(fmt = "Connection Refused, identifier rejected")]
    IdentifierRejected = 2,
    #[display(fmt = "Connection Refused, Server unavailable")]
    ServerUnavailable = 3,
    #[display(fmt = "Connection Refused, bad user name or password")]
    BadUserNameOrPassword = 4,
    #[display(fmt = "Connection Refused, not authorized")]
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn is_accepted(self) -> bool {
        self == ConnectReturnCode::ConnectionAccepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_header_packs_type_and_flags() {
        let header = FixedHeader {
            packet_type: PacketType::Publish,
            flags: 0b1011,
            remaining_length: 10,
        };

        assert_eq!(header.first_byte(), 0b0011_1011);
    }

    #[test]
    fn connect_flags_roundtrip_will_qos() {
        let flags = ConnectFlags::WILL.with_will_qos(QoS::ExactlyOnce);

        assert_eq!(flags.will_qos(), Some(QoS::ExactlyOnce));
        assert!(flags.contains(ConnectFlags::WILL));
    }
}
