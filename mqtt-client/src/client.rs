use std::sync::Arc;

use log::debug;

use mqtt_core::QoS;

use crate::ack::{AckKind, PendingAction, RecordError};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::platform::Countdown;
use crate::session::{Session, SessionState};
use crate::subscription::{Delivery, Handler, Subscription};
use crate::topic;
use crate::transport::Transport;

/// The public API facade (§4.G). Thin by design: every state mutation it
/// performs happens through [`Session`]'s lock helpers so the worker and any
/// number of producer threads observe a single, consistently ordered view.
pub struct Client {
    session: Arc<Session>,
}

impl Client {
    pub fn new(config: ClientConfig, transport: Box<dyn Transport>) -> Self {
        Client {
            session: Session::new(config, transport),
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Installs a reconnect-preparation hook, invoked at the top of every
    /// reconnect attempt (§4.F "Reconnect"). Must be called before
    /// [`Client::connect`]; later calls are refused since the session may
    /// already be shared with a running worker thread.
    pub fn set_reconnect_hook(&mut self, hook: impl Fn() + Send + Sync + 'static) -> Result<()> {
        let session = Arc::get_mut(&mut self.session).ok_or(Error::NotConnected)?;
        session.reconnect_hook = Some(Box::new(hook));
        Ok(())
    }

    /// Installs a fallback handler invoked for inbound messages that match
    /// no installed subscription (§4.E "Delivery selection"). Must be called
    /// before [`Client::connect`].
    pub fn set_interceptor(&mut self, interceptor: impl Fn(&Delivery) + Send + Sync + 'static) -> Result<()> {
        let session = Arc::get_mut(&mut self.session).ok_or(Error::NotConnected)?;
        session.interceptor = Some(Box::new(interceptor));
        Ok(())
    }

    /// `connect(c)` (§4.G): runs the CONNECT protocol and spawns the worker.
    pub fn connect(&self) -> Result<()> {
        self.session.connect()
    }

    /// `disconnect(c)` (§4.G): best-effort DISCONNECT, unconditional
    /// transition to `CLEAN_SESSION`.
    pub fn disconnect(&self) -> Result<()> {
        self.session.disconnect()
    }

    /// Polls the session for one turn of work, dispatching at most one
    /// inbound packet and retransmitting anything due. Also the mechanism
    /// the background worker itself uses (§4.F `yield`).
    pub fn yield_now(&self, timeout_ms: u64) -> Result<()> {
        self.session.yield_now(timeout_ms)
    }

    /// `CLEAN_SESSION` is terminal (§7): any public API call after
    /// `disconnect()` refuses with `Error::CleanSession` rather than the
    /// ordinary `NotConnected` (B4).
    fn require_connected(&self) -> Result<()> {
        match self.session.state() {
            SessionState::Connected => Ok(()),
            SessionState::CleanSession => Err(Error::CleanSession),
            _ => Err(Error::NotConnected),
        }
    }

    /// `subscribe(c, filter, qos, handler)` (§4.G).
    pub fn subscribe(&self, filter: impl Into<String>, qos: QoS, handler: Option<Handler>) -> Result<()> {
        let filter = filter.into();
        if !topic::validate_filter(&filter) {
            return Err(Error::InvalidTopicFilter(filter));
        }
        self.require_connected()?;

        let deadline = Countdown::new(self.session.config.cmd_timeout_ms);
        let packet_id = self.session.allocate_packet_id();

        let mut write = self.session.lock_write();
        let transport = write.transport.as_mut().ok_or(Error::NotConnected)?;

        let len =
            mqtt_packet::serialize_subscribe(write.framing.write_buf_mut(), packet_id, &[filter.as_str()], &[qos])?;
        write
            .framing
            .send_packet(transport, len, &deadline, &mut write.last_sent, self.session_keep_alive_ms())?;
        let payload = write.framing.write_buf()[..len].to_vec();

        let handler = handler.unwrap_or_else(default_handler);
        let entry = Subscription { filter, qos, handler };

        let mut global = self.session.lock_global();
        match global.ack_table.record(
            AckKind::SubscribeAck,
            packet_id,
            payload,
            PendingAction::InstallSubscription(entry),
            self.session.config.cmd_timeout_ms,
        ) {
            Ok(()) => Ok(()),
            Err(RecordError::Duplicate) => Err(Error::AckDuplicate),
            Err(RecordError::TooMany) => Err(Error::AckTooMany),
        }
    }

    /// `unsubscribe(c, filter)` (§4.G).
    pub fn unsubscribe(&self, filter: impl Into<String>) -> Result<()> {
        let filter = filter.into();
        self.require_connected()?;

        let deadline = Countdown::new(self.session.config.cmd_timeout_ms);
        let packet_id = self.session.allocate_packet_id();

        let mut write = self.session.lock_write();
        let transport = write.transport.as_mut().ok_or(Error::NotConnected)?;

        let len = mqtt_packet::serialize_unsubscribe(write.framing.write_buf_mut(), packet_id, &[filter.as_str()])?;
        write
            .framing
            .send_packet(transport, len, &deadline, &mut write.last_sent, self.session_keep_alive_ms())?;
        let payload = write.framing.write_buf()[..len].to_vec();

        let mut global = self.session.lock_global();
        if !global.subscriptions.contains(&filter) {
            debug!("unsubscribe requested for filter not in the subscription table: {filter:?}");
        }

        match global.ack_table.record(
            AckKind::UnsubscribeAck,
            packet_id,
            payload,
            PendingAction::RemoveSubscription(filter),
            self.session.config.cmd_timeout_ms,
        ) {
            Ok(()) => Ok(()),
            Err(RecordError::Duplicate) => Err(Error::AckDuplicate),
            Err(RecordError::TooMany) => Err(Error::AckTooMany),
        }
    }

    /// `publish(c, topic, msg)` (§4.G). QoS0 fires-and-forgets; QoS1/2 record
    /// an ack-table entry and mark the just-written buffer's DUP bit so any
    /// retransmit carries DUP=1 as required by MQTT 3.1.1 §3.3.1.1.
    pub fn publish(&self, topic_name: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()> {
        self.require_connected()?;

        let deadline = Countdown::new(self.session.config.cmd_timeout_ms);

        let mut global = self.session.lock_global();
        if qos != QoS::AtMostOnce && global.ack_table.len() >= crate::config::ACK_MAX {
            drop(global);
            self.fail_link();
            return Err(Error::AckTooMany);
        }

        let packet_id = if qos == QoS::AtMostOnce { None } else { Some(global.next_packet_id()) };
        drop(global);

        let mut write = self.session.lock_write();
        if payload.len() > write.framing.write_buf().len() {
            return Err(Error::BufferTooShort);
        }
        let transport = write.transport.as_mut().ok_or(Error::NotConnected)?;

        let len = mqtt_packet::serialize_publish(
            write.framing.write_buf_mut(),
            false,
            qos,
            retain,
            packet_id,
            topic_name,
            payload,
        )?;
        write
            .framing
            .send_packet(transport, len, &deadline, &mut write.last_sent, self.session_keep_alive_ms())?;

        if qos == QoS::AtMostOnce {
            return Ok(());
        }

        // Mark DUP for any future retransmit (§4.G): the saved payload is the
        // mutated form, so `scan`'s retransmits already carry DUP=1.
        write.framing.write_buf_mut()[0] |= 0b1000;
        let payload = write.framing.write_buf()[..len].to_vec();
        drop(write);

        let packet_id = packet_id.expect("QoS>0 always allocates a packet id");
        let kind = if qos == QoS::AtLeastOnce { AckKind::PublishAck } else { AckKind::PublishReceived };

        let mut global = self.session.lock_global();
        match global.ack_table.record(kind, packet_id, payload, PendingAction::None, self.session.config.cmd_timeout_ms) {
            Ok(()) => Ok(()),
            Err(RecordError::Duplicate) => Err(Error::AckDuplicate),
            Err(RecordError::TooMany) => {
                drop(global);
                self.fail_link();
                Err(Error::AckTooMany)
            }
        }
    }

    fn session_keep_alive_ms(&self) -> u64 {
        self.session.config.keep_alive_interval as u64 * 1000
    }

    /// Releases the transport and transitions to `DISCONNECTED` so the
    /// worker rebuilds the link (§4.G "On TooMany or OutOfMemory").
    fn fail_link(&self) {
        let mut write = self.session.lock_write();
        if let Some(transport) = write.transport.as_mut() {
            let _ = transport.disconnect();
        }
        write.transport = None;
        drop(write);
        self.session.mark_disconnected();
    }
}

fn default_handler() -> Handler {
    Box::new(|delivery: &Delivery| {
        log::info!(
            "message on {:?} delivered with no handler installed ({} bytes)",
            delivery.topic_name,
            delivery.payload.len()
        );
    })
}
