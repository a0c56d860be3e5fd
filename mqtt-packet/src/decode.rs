use std::convert::TryFrom;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, u8 as nom_u8};
use nom::IResult;

use mqtt_core::{decode_remaining_length, ConnectAckFlags, FixedHeader, PacketType, QoS};

use crate::error::DecodeError;
use crate::packet::{ConnectAck, Packet, Publish, SubscribeAck, SubscribeStatus};

type ParseResult<'a, T> = Result<(&'a [u8], T), DecodeError>;

fn map_incomplete<T>(result: IResult<&[u8], T>) -> ParseResult<T> {
    result.map_err(|err| match err {
        nom::Err::Incomplete(_) => DecodeError::Truncated,
        nom::Err::Error(_) | nom::Err::Failure(_) => DecodeError::Malformed("parse error"),
    })
}

fn utf8_str(input: &[u8]) -> ParseResult<&str> {
    let (input, len) = map_incomplete(be_u16(input))?;
    let (input, bytes) = map_incomplete(take(len)(input))?;
    let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok((input, s))
}

fn packet_id(input: &[u8]) -> ParseResult<u16> {
    map_incomplete(be_u16(input))
}

/// Reads the fixed header from the front of `input`, returning it alongside
/// the rest of the buffer still to be parsed. Returns `DecodeError::Truncated`
/// if `input` does not yet hold a complete header plus body; Framing treats
/// that as "wait for more bytes", not a protocol violation.
pub fn parse_fixed_header(input: &[u8]) -> Result<(&[u8], FixedHeader, &[u8]), DecodeError> {
    if input.is_empty() {
        return Err(DecodeError::Truncated);
    }
    let first = input[0];
    let packet_type = PacketType::try_from(first >> 4)
        .map_err(|_| DecodeError::UnknownPacketType(first >> 4))?;
    let flags = first & 0x0f;

    let (remaining_length, consumed) = decode_remaining_length(&input[1..])
        .map_err(|_| DecodeError::Truncated)?;

    let header_len = 1 + consumed;
    if input.len() < header_len + remaining_length {
        return Err(DecodeError::Truncated);
    }

    let header = FixedHeader {
        packet_type,
        flags,
        remaining_length,
    };
    let body = &input[header_len..header_len + remaining_length];
    let rest = &input[header_len + remaining_length..];
    Ok((rest, header, body))
}

/// Parses a full packet off the front of `input`. On success, returns the
/// decoded packet and the number of bytes it occupied; `DecodeError::Truncated`
/// means `input` holds an incomplete packet, not a malformed one.
pub fn deserialize_packet(input: &[u8]) -> Result<(usize, Packet), DecodeError> {
    let (_, header, body) = parse_fixed_header(input)?;
    let total_len = header_and_body_len(input)?;
    let packet = match header.packet_type {
        PacketType::ConnectAck => Packet::ConnectAck(deserialize_connack(body)?),
        PacketType::Publish => Packet::Publish(deserialize_publish(header, body)?),
        PacketType::PublishAck => Packet::PublishAck(deserialize_ack(body)?),
        PacketType::PublishReceived => Packet::PublishReceived(deserialize_ack(body)?),
        PacketType::PublishRelease => Packet::PublishRelease(deserialize_ack(body)?),
        PacketType::PublishComplete => Packet::PublishComplete(deserialize_ack(body)?),
        PacketType::SubscribeAck => Packet::SubscribeAck(deserialize_suback(body)?),
        PacketType::UnsubscribeAck => Packet::UnsubscribeAck(deserialize_unsuback(body)?),
        PacketType::PingResponse => Packet::PingResponse,
        other => return Err(DecodeError::Malformed(unexpected_inbound_kind(other))),
    };

    Ok((total_len, packet))
}

fn unexpected_inbound_kind(packet_type: PacketType) -> &'static str {
    match packet_type {
        PacketType::Connect
        | PacketType::Subscribe
        | PacketType::Unsubscribe
        | PacketType::PingRequest
        | PacketType::Disconnect => "client-to-broker packet type received from the broker",
        _ => "unexpected packet type",
    }
}

fn remaining_length_size(input: &[u8]) -> Result<usize, DecodeError> {
    if input.is_empty() {
        return Err(DecodeError::Truncated);
    }
    let (_, consumed) = decode_remaining_length(&input[1..]).map_err(|_| DecodeError::Truncated)?;
    Ok(consumed)
}

fn header_and_body_len(input: &[u8]) -> Result<usize, DecodeError> {
    let consumed = remaining_length_size(input)?;
    let (remaining_length, _) =
        decode_remaining_length(&input[1..]).map_err(|_| DecodeError::Truncated)?;
    Ok(1 + consumed + remaining_length)
}

/// Decodes a CONNACK body (already separated from its fixed header).
pub fn deserialize_connack(body: &[u8]) -> Result<ConnectAck, DecodeError> {
    if body.len() != 2 {
        return Err(DecodeError::Malformed("CONNACK body must be 2 bytes"));
    }
    let flags = ConnectAckFlags::from_bits_truncate(body[0]);
    let return_code = mqtt_core::ConnectReturnCode::try_from(body[1])
        .map_err(|_| DecodeError::Malformed("unknown CONNACK return code"))?;

    Ok(ConnectAck {
        session_present: flags.contains(ConnectAckFlags::SESSION_PRESENT),
        return_code,
    })
}

/// Decodes a PUBLISH body. `header.flags` carries DUP/QoS/RETAIN; the packet
/// id is only present when QoS is 1 or 2 (MQTT 3.1.1 §3.3.2.2).
pub fn deserialize_publish<'a>(
    header: FixedHeader,
    body: &'a [u8],
) -> Result<Publish<'a>, DecodeError> {
    let dup = header.flags & 0b1000 != 0;
    let retain = header.flags & 0b0001 != 0;
    let qos = QoS::try_from((header.flags >> 1) & 0b11)
        .map_err(|_| DecodeError::Malformed("invalid QoS in PUBLISH flags"))?;

    let (rest, topic) = utf8_str(body)?;

    let (rest, packet_id) = if qos == QoS::AtMostOnce {
        (rest, None)
    } else {
        let (rest, id) = packet_id(rest)?;
        (rest, Some(id))
    };

    Ok(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload: rest,
    })
}

/// Decodes a bare-packet-id body: PUBACK, PUBREC, PUBREL, PUBCOMP, UNSUBACK.
pub fn deserialize_ack(body: &[u8]) -> Result<u16, DecodeError> {
    let (_, id) = packet_id(body)?;
    Ok(id)
}

/// Decodes an UNSUBACK body. Identical wire shape to the other bare-id acks;
/// kept as its own function so callers can name what they're parsing.
pub fn deserialize_unsuback(body: &[u8]) -> Result<u16, DecodeError> {
    deserialize_ack(body)
}

/// Decodes a SUBACK body: packet id followed by one status byte per filter.
pub fn deserialize_suback(body: &[u8]) -> Result<SubscribeAck, DecodeError> {
    let (mut rest, id) = packet_id(body)?;
    let mut status = Vec::with_capacity(rest.len());

    while !rest.is_empty() {
        let (r, code) = map_incomplete(nom_u8(rest))?;
        rest = r;
        let entry = if code == SubscribeStatus::FAILURE_CODE {
            SubscribeStatus::Failure
        } else {
            let qos = QoS::try_from(code)
                .map_err(|_| DecodeError::Malformed("invalid SUBACK status byte"))?;
            SubscribeStatus::Granted(qos)
        };
        status.push(entry);
    }

    Ok(SubscribeAck {
        packet_id: id,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::serialize_publish;

    #[test]
    fn roundtrips_qos1_publish_through_fixed_header() {
        let mut buf = [0u8; 64];
        let len = serialize_publish(
            &mut buf,
            false,
            QoS::AtLeastOnce,
            true,
            Some(42),
            "a/b",
            b"payload",
        )
        .unwrap();

        let (consumed, packet) = deserialize_packet(&buf[..len]).unwrap();
        assert_eq!(consumed, len);

        match packet {
            Packet::Publish(publish) => {
                assert_eq!(publish.topic, "a/b");
                assert_eq!(publish.packet_id, Some(42));
                assert!(publish.retain);
                assert_eq!(publish.payload, b"payload");
            }
            other => panic!("expected Publish, got {:?}", other),
        }
    }

    #[test]
    fn reports_truncated_for_partial_packet() {
        let mut buf = [0u8; 64];
        let len = serialize_publish(&mut buf, false, QoS::AtMostOnce, false, None, "t", b"x")
            .unwrap();

        assert_eq!(
            deserialize_packet(&buf[..len - 1]),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn suback_mixed_grants_and_failure() {
        let body = [0, 7, 1, SubscribeStatus::FAILURE_CODE];
        let ack = deserialize_suback(&body).unwrap();

        assert_eq!(ack.packet_id, 7);
        assert_eq!(ack.status[0], SubscribeStatus::Granted(QoS::AtLeastOnce));
        assert!(ack.status[1].is_failure());
    }
}
