use byteorder::{BigEndian, ByteOrder};
use mqtt_core::{encode_remaining_length, ConnectFlags, FixedHeader, PacketId, PacketType, QoS};

use crate::error::EncodeError;
use crate::packet::{AckPacketType, ConnectOptions};

/// A bounds-checked cursor over a caller-owned, non-growing buffer.
///
/// Every `put_*` call fails with `EncodeError::BufferTooShort` instead of
/// panicking or silently truncating; the engine never grows this buffer
/// implicitly (§3 "Buffers").
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Writer { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn put_u8(&mut self, byte: u8) -> Result<(), EncodeError> {
        if self.remaining() < 1 {
            return Err(EncodeError::BufferTooShort);
        }
        self.buf[self.pos] = byte;
        self.pos += 1;
        Ok(())
    }

    fn put_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        if self.remaining() < 2 {
            return Err(EncodeError::BufferTooShort);
        }
        BigEndian::write_u16(&mut self.buf[self.pos..self.pos + 2], value);
        self.pos += 2;
        Ok(())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if self.remaining() < bytes.len() {
            return Err(EncodeError::BufferTooShort);
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    fn put_str(&mut self, s: &str) -> Result<(), EncodeError> {
        let len: u16 = s
            .len()
            .try_into()
            .map_err(|_| EncodeError::StringTooLong)?;
        self.put_u16(len)?;
        self.put_bytes(s.as_bytes())
    }

    /// Reserves room for a fixed header (type/flags byte + up to 4 varint
    /// bytes), to be filled in by `finish` once the variable header and
    /// payload have been written.
    fn reserve_fixed_header(&mut self) -> Result<usize, EncodeError> {
        if self.remaining() < 5 {
            return Err(EncodeError::BufferTooShort);
        }
        let at = self.pos;
        self.pos += 5;
        Ok(at)
    }

    /// Backfills the fixed header reserved at `at`, then shifts the body left
    /// to close the gap left by the (usually shorter) remaining-length varint.
    fn finish(self, at: usize, packet_type: PacketType, flags: u8) -> Result<usize, EncodeError> {
        let body_len = self.pos - at - 5;
        let header = FixedHeader {
            packet_type,
            flags,
            remaining_length: body_len,
        };

        let mut varint = [0u8; 4];
        let varint_len = encode_remaining_length(&mut varint, body_len)?;

        self.buf[at] = header.first_byte();
        self.buf[at + 1..at + 1 + varint_len].copy_from_slice(&varint[..varint_len]);

        let gap = 4 - varint_len;
        if gap > 0 {
            self.buf.copy_within(at + 5..self.pos, at + 1 + varint_len);
        }

        Ok(self.pos - gap)
    }
}

/// Serializes a CONNECT packet.
pub fn serialize_connect(buf: &mut [u8], options: &ConnectOptions) -> Result<usize, EncodeError> {
    let mut w = Writer::new(buf);
    let at = w.reserve_fixed_header()?;

    w.put_bytes(mqtt_core::PROTOCOL_NAME)?;
    w.put_u8(mqtt_core::PROTOCOL_LEVEL)?;

    let mut flags = ConnectFlags::empty();
    if options.clean_session {
        flags |= ConnectFlags::CLEAN_SESSION;
    }
    if let Some(will) = &options.last_will {
        flags |= ConnectFlags::WILL | ConnectFlags::empty().with_will_qos(will.qos);
        if will.retain {
            flags |= ConnectFlags::WILL_RETAIN;
        }
    }
    if options.username.is_some() {
        flags |= ConnectFlags::USERNAME;
    }
    if options.password.is_some() {
        flags |= ConnectFlags::PASSWORD;
    }

    w.put_u8(flags.bits())?;
    w.put_u16(options.keep_alive)?;
    w.put_str(options.client_id)?;

    if let Some(will) = &options.last_will {
        w.put_str(will.topic)?;
        w.put_u16(will.message.len().try_into().map_err(|_| EncodeError::StringTooLong)?)?;
        w.put_bytes(will.message)?;
    }
    if let Some(username) = options.username {
        w.put_str(username)?;
    }
    if let Some(password) = options.password {
        w.put_u16(password.len().try_into().map_err(|_| EncodeError::StringTooLong)?)?;
        w.put_bytes(password)?;
    }

    w.finish(at, PacketType::Connect, 0)
}

/// Serializes a PUBLISH packet. `dup` should be `false` for the first send;
/// retransmission from the ack table mutates byte 0 in place instead of
/// re-serializing (§4.G "Setting the DUP bit").
#[allow(clippy::too_many_arguments)]
pub fn serialize_publish(
    buf: &mut [u8],
    dup: bool,
    qos: QoS,
    retain: bool,
    packet_id: Option<PacketId>,
    topic: &str,
    payload: &[u8],
) -> Result<usize, EncodeError> {
    let mut w = Writer::new(buf);
    let at = w.reserve_fixed_header()?;

    w.put_str(topic)?;
    if qos != QoS::AtMostOnce {
        w.put_u16(packet_id.unwrap_or(1))?;
    }
    w.put_bytes(payload)?;

    let mut flags = (qos as u8) << 1;
    if dup {
        flags |= 0b1000;
    }
    if retain {
        flags |= 0b0001;
    }

    w.finish(at, PacketType::Publish, flags)
}

/// Serializes a bare-packet-id acknowledgment: PUBACK, PUBREC, PUBREL, or
/// PUBCOMP. `dup` is accepted for interface symmetry with the embedded
/// original but MQTT 3.1.1 defines no DUP bit for acknowledgments; only
/// PUBREL's reserved flags (`0b0010`) are fixed by the spec.
pub fn serialize_ack(
    buf: &mut [u8],
    kind: AckPacketType,
    _dup: bool,
    packet_id: PacketId,
) -> Result<usize, EncodeError> {
    let mut w = Writer::new(buf);
    let at = w.reserve_fixed_header()?;
    w.put_u16(packet_id)?;

    let flags = if kind == AckPacketType::PublishRelease {
        0b0010
    } else {
        0
    };

    w.finish(at, kind.wire_type(), flags)
}

/// Serializes a SUBSCRIBE packet with one QoS per filter.
pub fn serialize_subscribe(
    buf: &mut [u8],
    packet_id: PacketId,
    filters: &[&str],
    qoses: &[QoS],
) -> Result<usize, EncodeError> {
    debug_assert_eq!(filters.len(), qoses.len());

    let mut w = Writer::new(buf);
    let at = w.reserve_fixed_header()?;
    w.put_u16(packet_id)?;

    for (filter, qos) in filters.iter().zip(qoses) {
        w.put_str(filter)?;
        w.put_u8(*qos as u8)?;
    }

    w.finish(at, PacketType::Subscribe, 0b0010)
}

/// Serializes an UNSUBSCRIBE packet.
pub fn serialize_unsubscribe(
    buf: &mut [u8],
    packet_id: PacketId,
    filters: &[&str],
) -> Result<usize, EncodeError> {
    let mut w = Writer::new(buf);
    let at = w.reserve_fixed_header()?;
    w.put_u16(packet_id)?;

    for filter in filters {
        w.put_str(filter)?;
    }

    w.finish(at, PacketType::Unsubscribe, 0b0010)
}

/// Serializes a zero-length-body DISCONNECT packet.
pub fn serialize_disconnect(buf: &mut [u8]) -> Result<usize, EncodeError> {
    let mut w = Writer::new(buf);
    let at = w.reserve_fixed_header()?;
    w.finish(at, PacketType::Disconnect, 0)
}

/// Serializes a zero-length-body PINGREQ packet.
pub fn serialize_pingreq(buf: &mut [u8]) -> Result<usize, EncodeError> {
    let mut w = Writer::new(buf);
    let at = w.reserve_fixed_header()?;
    w.finish(at, PacketType::PingRequest, 0)
}
