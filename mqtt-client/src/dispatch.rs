use log::{debug, warn};

use mqtt_core::QoS;
use mqtt_packet::{AckPacketType, Packet};

use crate::ack::{AckKind, PendingAction, RecordError};
use crate::error::Result;
use crate::framing::Framing;
use crate::platform::Countdown;
use crate::session::Session;
use crate::subscription::Delivery;
use crate::transport::Transport;

/// Everything the dispatcher needs to act on a freshly received packet
/// (§4.E). Bundled into one struct so `dispatch_packet` stays a single,
/// testable entry point instead of an eight-argument function.
///
/// `session` is used to take the global mutex only for the instant of each
/// ack-table/subscription-table touch (§5: the global mutex must never be
/// held across a transport call); `framing`/`transport`/`last_sent` are
/// borrowed from the write mutex the caller already holds for the whole
/// turn, which is allowed to span the send path.
pub struct DispatchContext<'a> {
    pub session: &'a Session,
    pub framing: &'a mut Framing,
    pub transport: &'a mut dyn Transport,
    pub deadline: &'a Countdown,
    pub last_sent: &'a mut Countdown,
    pub keep_alive_ms: u64,
    pub cmd_timeout_ms: u64,
    pub interceptor: Option<&'a mut dyn FnMut(&Delivery)>,
}

fn send_ack(ctx: &mut DispatchContext, kind: AckPacketType, packet_id: u16) -> Result<Vec<u8>> {
    let len = mqtt_packet::serialize_ack(ctx.framing.write_buf_mut(), kind, false, packet_id)?;
    let payload = ctx.framing.write_buf()[..len].to_vec();
    ctx.framing
        .send_packet(ctx.transport, len, ctx.deadline, ctx.last_sent, ctx.keep_alive_ms)?;
    Ok(payload)
}

fn deliver(ctx: &mut DispatchContext, delivery: Delivery) {
    {
        let mut global = ctx.session.lock_global();
        if let Some(subscription) = global.subscriptions.find_for_mut(delivery.topic_name) {
            (subscription.handler)(&delivery);
            return;
        }
    }
    if let Some(interceptor) = ctx.interceptor.as_deref_mut() {
        interceptor(&delivery);
    } else {
        debug!("dropping message for unmatched topic {:?}", delivery.topic_name);
    }
}

/// Handles one freshly decoded packet. `raw` is the exact bytes Framing left
/// in the read buffer; this function decodes it and mutates the ack table /
/// subscription table / write buffer as §4.E prescribes.
pub fn dispatch_packet(ctx: &mut DispatchContext, raw: &[u8]) -> Result<()> {
    let (_, packet) = mqtt_packet::deserialize_packet(raw)?;

    match packet {
        Packet::ConnectAck(_) => {
            // Only meaningful inside the connect path; a stray CONNACK here is ignored.
        }

        Packet::PublishAck(id) => {
            ctx.session.lock_global().ack_table.unrecord(AckKind::PublishAck, id);
        }

        Packet::PublishComplete(id) => {
            ctx.session.lock_global().ack_table.unrecord(AckKind::PublishComplete, id);
        }

        Packet::PublishReceived(id) => {
            // spec order: serialize PUBREL, record PUBCOMP, THEN send — a
            // record failure (ack table full) must abort the send rather
            // than leave an untracked PUBREL in flight. The record itself
            // is a single brief global-mutex critical section, taken and
            // dropped before the (possibly blocking) send.
            let len = mqtt_packet::serialize_ack(ctx.framing.write_buf_mut(), AckPacketType::PublishRelease, false, id)?;
            let payload = ctx.framing.write_buf()[..len].to_vec();
            let record = ctx.session.lock_global().ack_table.record(
                AckKind::PublishComplete,
                id,
                payload,
                PendingAction::None,
                ctx.cmd_timeout_ms,
            );
            match record {
                Ok(()) => {}
                Err(RecordError::Duplicate) => return Err(crate::error::Error::AckDuplicate),
                Err(RecordError::TooMany) => return Err(crate::error::Error::AckTooMany),
            }
            ctx.framing
                .send_packet(ctx.transport, len, ctx.deadline, ctx.last_sent, ctx.keep_alive_ms)?;
            ctx.session.lock_global().ack_table.unrecord(AckKind::PublishReceived, id);
        }

        Packet::PublishRelease(id) => {
            send_ack(ctx, AckPacketType::PublishComplete, id)?;
            ctx.session.lock_global().ack_table.unrecord(AckKind::PublishRelease, id);
        }

        Packet::SubscribeAck(ack) => {
            let pending = ctx.session.lock_global().ack_table.unrecord(AckKind::SubscribeAck, ack.packet_id);
            let granted = ack.status.first().map(|status| !status.is_failure()).unwrap_or(false);

            match pending {
                Some(PendingAction::InstallSubscription(subscription)) if granted => {
                    ctx.session.lock_global().subscriptions.install(subscription);
                }
                Some(PendingAction::InstallSubscription(_)) => {
                    debug!("SUBACK {} reported failure, handler discarded", ack.packet_id);
                }
                _ => {}
            }
        }

        Packet::UnsubscribeAck(id) => {
            let pending = ctx.session.lock_global().ack_table.unrecord(AckKind::UnsubscribeAck, id);
            if let Some(PendingAction::RemoveSubscription(filter)) = pending {
                ctx.session.lock_global().subscriptions.remove(&filter);
            }
        }

        Packet::Publish(publish) => {
            let delivery = Delivery {
                topic_name: publish.topic,
                qos: publish.qos,
                retained: publish.retain,
                dup: publish.dup,
                packet_id: publish.packet_id,
                payload: publish.payload,
            };

            match publish.qos {
                QoS::AtMostOnce => deliver(ctx, delivery),
                QoS::AtLeastOnce => {
                    let id = publish.packet_id.ok_or(crate::error::Error::BufferTooShort)?;
                    deliver(ctx, delivery);
                    send_ack(ctx, AckPacketType::PublishAck, id)?;
                }
                QoS::ExactlyOnce => {
                    let id = publish.packet_id.ok_or(crate::error::Error::BufferTooShort)?;
                    let payload = send_ack(ctx, AckPacketType::PublishReceived, id)?;
                    let record = ctx.session.lock_global().ack_table.record(
                        AckKind::PublishRelease,
                        id,
                        payload,
                        PendingAction::None,
                        ctx.cmd_timeout_ms,
                    );
                    // Deliver unless this exact (kind, id) is already on
                    // file — that's the QoS2 "duplicate arrival" case.
                    // TooMany and any other non-duplicate record failure
                    // still deliver, matching the original's
                    // `rc != MQTT_ACK_NODE_IS_EXIST_ERROR` check.
                    if !matches!(record, Err(RecordError::Duplicate)) {
                        deliver(ctx, delivery);
                    }
                }
            }
        }

        Packet::PingResponse => {
            ctx.session.lock_global().ping_outstanding = false;
        }
    }

    Ok(())
}

pub fn log_worker_error(context: &str, err: &crate::error::Error) {
    warn!("{context}: {err}");
}
