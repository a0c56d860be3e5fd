use std::collections::HashMap;

use mqtt_packet::AckPacketType;

use crate::config::ACK_MAX;
use crate::platform::Countdown;
use crate::subscription::Subscription;

/// What to do with a SUBACK/UNSUBACK entry once it is acknowledged (§4.E):
/// install the pending subscription, or nothing (unsubscribe has none to
/// install).
pub enum PendingAction {
    InstallSubscription(Subscription),
    RemoveSubscription(String),
    None,
}

/// Outstanding `(kind, packet_id)` entry (§3 "Ack entry"). The saved payload
/// is the full serialized outbound packet so retransmission needs no
/// re-serialization; `deadline` is reset on every retransmit.
pub struct AckEntry {
    pub deadline: Countdown,
    pub payload: Vec<u8>,
    pub pending: PendingAction,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AckKind {
    PublishAck,
    PublishReceived,
    PublishRelease,
    PublishComplete,
    SubscribeAck,
    UnsubscribeAck,
}

impl From<AckPacketType> for AckKind {
    fn from(kind: AckPacketType) -> Self {
        match kind {
            AckPacketType::PublishAck => AckKind::PublishAck,
            AckPacketType::PublishReceived => AckKind::PublishReceived,
            AckPacketType::PublishRelease => AckKind::PublishRelease,
            AckPacketType::PublishComplete => AckKind::PublishComplete,
        }
    }
}

#[derive(Debug)]
pub enum RecordError {
    Duplicate,
    TooMany,
}

/// What `scan` wants the caller to do with a retransmit-eligible entry: the
/// table itself never touches the write mutex or the transport.
pub struct Retransmit {
    pub kind: AckKind,
    pub packet_id: u16,
    pub payload: Vec<u8>,
}

/// Table of outstanding acknowledgments, keyed by `(kind, packet_id)` so
/// `record`/`unrecord` are O(1) (Design Notes: replace the intrusive list
/// with a map keyed by `(kind, packet_id)`).
#[derive(Default)]
pub struct AckTable {
    entries: HashMap<(AckKind, u16), AckEntry>,
}

impl AckTable {
    pub fn new() -> Self {
        AckTable { entries: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(
        &mut self,
        kind: AckKind,
        packet_id: u16,
        payload: Vec<u8>,
        pending: PendingAction,
        cmd_timeout_ms: u64,
    ) -> Result<(), RecordError> {
        let key = (kind, packet_id);
        if self.entries.contains_key(&key) {
            return Err(RecordError::Duplicate);
        }
        if self.entries.len() >= ACK_MAX {
            return Err(RecordError::TooMany);
        }

        self.entries.insert(
            key,
            AckEntry {
                deadline: Countdown::new(cmd_timeout_ms),
                payload,
                pending,
            },
        );
        Ok(())
    }

    pub fn unrecord(&mut self, kind: AckKind, packet_id: u16) -> Option<PendingAction> {
        self.entries.remove(&(kind, packet_id)).map(|entry| entry.pending)
    }

    /// Walks all entries. When `blocking` is true, unexpired entries are
    /// skipped. PUBACK/PUBREC/PUBREL/PUBCOMP entries are due for
    /// retransmission (caller resends under the write mutex and calls
    /// [`AckTable::reset_deadline`]); SUBACK/UNSUBACK entries are simply
    /// dropped along with any pending action — subscribe/unsubscribe are not
    /// retried at the protocol level, the reconnect path re-subscribes from
    /// the subscription table instead.
    pub fn scan(&mut self, blocking: bool, cmd_timeout_ms: u64) -> Vec<Retransmit> {
        let mut due = Vec::new();
        let mut drop_keys = Vec::new();

        for (&(kind, packet_id), entry) in self.entries.iter() {
            if blocking && !entry.deadline.is_expired() {
                continue;
            }

            match kind {
                AckKind::PublishAck | AckKind::PublishReceived | AckKind::PublishRelease | AckKind::PublishComplete => {
                    due.push(Retransmit {
                        kind,
                        packet_id,
                        payload: entry.payload.clone(),
                    });
                }
                AckKind::SubscribeAck | AckKind::UnsubscribeAck => {
                    drop_keys.push((kind, packet_id));
                }
            }
        }

        for key in drop_keys {
            self.entries.remove(&key);
        }
        for retransmit in &due {
            if let Some(entry) = self.entries.get_mut(&(retransmit.kind, retransmit.packet_id)) {
                entry.deadline.reset(cmd_timeout_ms);
            }
        }

        due
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }
}
