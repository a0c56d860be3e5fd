use mqtt_core::{PacketId, QoS};

/// A decoded MQTT Control Packet, borrowing its string/byte views from the
/// caller's read buffer (no allocation on the decode path).
#[derive(Debug, PartialEq, Clone)]
pub enum Packet<'a> {
    ConnectAck(ConnectAck),
    Publish(Publish<'a>),
    PublishAck(PacketId),
    PublishReceived(PacketId),
    PublishRelease(PacketId),
    PublishComplete(PacketId),
    SubscribeAck(SubscribeAck),
    UnsubscribeAck(PacketId),
    PingResponse,
}

/// Options the caller provides to `serialize_connect`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub last_will: Option<LastWill<'a>>,
}

/// The Will message a broker should publish on this client's behalf if the
/// network connection is lost ungracefully.
#[derive(Debug, Clone)]
pub struct LastWill<'a> {
    pub topic: &'a str,
    pub message: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

/// CONNACK: session-present flag plus the broker's return code.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct ConnectAck {
    pub session_present: bool,
    pub return_code: mqtt_core::ConnectReturnCode,
}

/// A received PUBLISH, still borrowing its topic/payload from the read buffer.
#[derive(Debug, PartialEq, Clone)]
pub struct Publish<'a> {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: &'a str,
    pub packet_id: Option<PacketId>,
    pub payload: &'a [u8],
}

/// SUBACK: the packet id plus one granted-QoS-or-failure result per filter,
/// in the order the filters were submitted.
#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeAck {
    pub packet_id: PacketId,
    pub status: Vec<SubscribeStatus>,
}

/// Per-filter SUBACK result (MQTT 3.1.1 §3.9.3).
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SubscribeStatus {
    Granted(QoS),
    Failure,
}

impl SubscribeStatus {
    pub const FAILURE_CODE: u8 = 0x80;

    pub fn is_failure(self) -> bool {
        matches!(self, SubscribeStatus::Failure)
    }
}

/// The four kinds of inbound/outbound acknowledgment that carry only a bare
/// packet id on the wire: PUBACK, PUBREC, PUBREL, PUBCOMP.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum AckPacketType {
    PublishAck,
    PublishReceived,
    PublishRelease,
    PublishComplete,
}

impl AckPacketType {
    pub fn wire_type(self) -> mqtt_core::PacketType {
        use mqtt_core::PacketType::*;

        match self {
            AckPacketType::PublishAck => PublishAck,
            AckPacketType::PublishReceived => PublishReceived,
            AckPacketType::PublishRelease => PublishRelease,
            AckPacketType::PublishComplete => PublishComplete,
        }
    }
}
