use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::{debug, error, info, warn};

use mqtt_core::ConnectReturnCode;
use mqtt_packet::{ConnectOptions, LastWill, Packet};

use crate::ack::AckTable;
use crate::config::ClientConfig;
use crate::dispatch::{dispatch_packet, log_worker_error, DispatchContext};
use crate::error::{Error, Result};
use crate::framing::Framing;
use crate::platform::Countdown;
use crate::subscription::SubscriptionTable;
use crate::transport::Transport;

/// Session state (§4.F). Read-only accesses are lock-free (`state()`);
/// transitions happen while the caller already holds the global mutex (I3).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Invalid = 0,
    Initialized = 1,
    Connected = 2,
    Disconnected = 3,
    CleanSession = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Invalid,
            1 => SessionState::Initialized,
            2 => SessionState::Connected,
            3 => SessionState::Disconnected,
            _ => SessionState::CleanSession,
        }
    }
}

/// Everything guarded by the write mutex: the outbound transport handle,
/// the write buffer, and the last-sent keep-alive countdown.
pub(crate) struct WriteSide {
    pub transport: Option<Box<dyn Transport>>,
    pub framing: Framing,
    pub last_sent: Countdown,
}

/// Everything guarded by the global mutex: counters and the two tables
/// (§3 I3).
pub(crate) struct GlobalState {
    pub next_packet_id: u16,
    pub ack_table: AckTable,
    pub subscriptions: SubscriptionTable,
    pub ping_outstanding: bool,
    pub last_received: Countdown,
}

impl GlobalState {
    /// Allocates the next packet id, wrapping `65535 -> 1`; 0 never appears
    /// (P6).
    pub(crate) fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = if id == 65535 { 1 } else { id + 1 };
        id
    }
}

/// The session state machine and its background worker (§4.F). Owns the
/// write mutex and the global mutex in that lock order (§5).
pub struct Session {
    pub(crate) config: ClientConfig,
    pub(crate) write: Mutex<WriteSide>,
    pub(crate) global: Mutex<GlobalState>,
    state: AtomicU8,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    pub(crate) reconnect_hook: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) interceptor: Option<Box<dyn Fn(&crate::subscription::Delivery) + Send + Sync>>,
}

impl Session {
    pub fn new(config: ClientConfig, transport: Box<dyn Transport>) -> Arc<Session> {
        let write_buf_size = config.write_buf_size;

        Arc::new(Session {
            config,
            write: Mutex::new(WriteSide {
                transport: Some(transport),
                framing: Framing::new(0, write_buf_size),
                last_sent: Countdown::expired(),
            }),
            global: Mutex::new(GlobalState {
                next_packet_id: 1,
                ack_table: AckTable::new(),
                subscriptions: SubscriptionTable::new(),
                ping_outstanding: false,
                last_received: Countdown::expired(),
            }),
            state: AtomicU8::new(SessionState::Initialized as u8),
            worker: Mutex::new(None),
            reconnect_hook: None,
            interceptor: None,
        })
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, _global: &MutexGuard<GlobalState>, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn lock_write(&self) -> MutexGuard<WriteSide> {
        self.write.lock().expect("write mutex poisoned")
    }

    pub(crate) fn lock_global(&self) -> MutexGuard<GlobalState> {
        self.global.lock().expect("global mutex poisoned")
    }

    pub(crate) fn allocate_packet_id(&self) -> u16 {
        self.lock_global().next_packet_id()
    }

    /// Runs the CONNECT protocol (§4.F "Connect protocol"). Called both for
    /// the initial `connect()` and at the top of every reconnect attempt.
    fn connect_with_results(&self, write: &mut WriteSide) -> Result<()> {
        let transport = write
            .transport
            .as_mut()
            .ok_or(Error::NotConnected)?;
        transport.connect()?;

        let deadline = Countdown::new(self.config.cmd_timeout_ms);

        let mut options = ConnectOptions {
            client_id: &self.config.client_id,
            clean_session: self.config.clean_session,
            keep_alive: self.config.keep_alive_interval,
            username: self.config.user_name.as_deref(),
            password: self.config.password.as_deref(),
            last_will: None,
        };
        let will_storage;
        if let Some(will) = &self.config.will {
            will_storage = LastWill {
                topic: &will.topic,
                message: &will.message,
                qos: will.qos,
                retain: will.retained,
            };
            options.last_will = Some(will_storage);
        }

        let len = mqtt_packet::serialize_connect(write.framing.write_buf_mut(), &options)?;
        write
            .framing
            .send_packet(transport, len, &deadline, &mut write.last_sent, self.keep_alive_ms())?;

        // The handshake runs before the worker exists, so it is safe to read
        // directly off the same transport handle here.
        let mut handshake_buf = vec![0u8; self.config.read_buf_size];
        let n = read_one_packet(transport.as_mut(), &mut handshake_buf, &deadline)?;

        let (_, packet) = mqtt_packet::deserialize_packet(&handshake_buf[..n])?;
        match packet {
            Packet::ConnectAck(ack) if ack.return_code.is_accepted() => Ok(()),
            Packet::ConnectAck(ack) => Err(Error::ConnectFailed(ack.return_code)),
            _ => Err(Error::ConnectFailed(ConnectReturnCode::ServerUnavailable)),
        }
    }

    fn keep_alive_ms(&self) -> u64 {
        self.config.keep_alive_interval as u64 * 1000
    }

    /// Transitions straight to `DISCONNECTED`, used by the public API facade
    /// when an ack-table overflow means the link must be rebuilt (§4.G "On
    /// TooMany or OutOfMemory").
    pub(crate) fn mark_disconnected(&self) {
        let global = self.lock_global();
        self.set_state(&global, SessionState::Disconnected);
    }

    /// Public `connect()` entry point (§4.G). Spawns the worker on success.
    ///
    /// The global mutex is taken only after `connect_with_results` returns
    /// (it performs the blocking transport connect/handshake under the
    /// write mutex alone, per §5: the global mutex must never be held
    /// across a transport call).
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        let mut write = self.lock_write();
        let outcome = self.connect_with_results(&mut write);

        match outcome {
            Ok(()) => {
                let mut global = self.lock_global();
                global.last_received.reset(self.keep_alive_ms());
                global.ping_outstanding = false;
                self.set_state(&global, SessionState::Connected);
                drop(global);
                drop(write);
            }
            Err(err) => {
                if let Some(transport) = write.transport.as_mut() {
                    let _ = transport.disconnect();
                }
                drop(write);
                let global = self.lock_global();
                self.set_state(&global, SessionState::Initialized);
                return Err(err);
            }
        }

        self.spawn_worker_if_absent();
        Ok(())
    }

    fn spawn_worker_if_absent(self: &Arc<Self>) {
        let mut worker = self.worker.lock().expect("worker mutex poisoned");
        if worker.is_some() {
            return;
        }

        let read_transport = {
            let write = self.lock_write();
            write
                .transport
                .as_ref()
                .and_then(|t| t.try_clone().ok())
        };

        let Some(read_transport) = read_transport else {
            error!("failed to clone a read handle for the worker; link will appear connected but never receive");
            return;
        };

        let session = Arc::clone(self);
        *worker = Some(thread::spawn(move || session.worker_loop(read_transport)));
    }

    /// `disconnect(c)` (§4.G): best-effort DISCONNECT, unconditional
    /// transition to `CLEAN_SESSION`.
    pub fn disconnect(&self) -> Result<()> {
        let mut write = self.lock_write();
        if let Some(transport) = write.transport.as_mut() {
            let deadline = Countdown::new(self.config.cmd_timeout_ms);
            if let Ok(len) = mqtt_packet::serialize_disconnect(write.framing.write_buf_mut()) {
                let _ = write
                    .framing
                    .send_packet(transport, len, &deadline, &mut write.last_sent, self.keep_alive_ms());
            }
        }

        let global = self.lock_global();
        self.set_state(&global, SessionState::CleanSession);
        Ok(())
    }

    /// Reconnect (§4.F "Reconnect"): prep hook, connect, resubscribe,
    /// retransmit outstanding acks.
    ///
    /// The write mutex spans the whole function (it owns the transport
    /// handle and the send path, which §5 allows across transport calls);
    /// the global mutex is taken only for the instant of each counter/table
    /// touch (packet-id allocation, the resubscribe snapshot, the
    /// retransmit-due scan) and is always dropped before the matching
    /// `send_packet` call, never held across it.
    fn reconnect(self: &Arc<Self>) -> Result<()> {
        if let Some(hook) = &self.reconnect_hook {
            hook();
        }

        let mut write = self.lock_write();
        match self.connect_with_results(&mut write) {
            Ok(()) => {}
            Err(_) => {
                drop(write);
                thread::sleep(std::time::Duration::from_millis(self.config.reconnect_try_duration_ms));
                return Err(Error::ReconnectTimeout);
            }
        }

        {
            let mut global = self.lock_global();
            global.last_received.reset(self.keep_alive_ms());
            global.ping_outstanding = false;
        }

        let deadline = Countdown::new(self.config.cmd_timeout_ms);
        let transport = write.transport.as_mut().ok_or(Error::NotConnected)?;

        let resubscribe_filters: Vec<(String, mqtt_core::QoS)> = {
            let global = self.lock_global();
            global.subscriptions.iter().map(|s| (s.filter.clone(), s.qos)).collect()
        };

        for (filter, qos) in &resubscribe_filters {
            let packet_id = self.lock_global().next_packet_id();
            let len = mqtt_packet::serialize_subscribe(
                write.framing.write_buf_mut(),
                packet_id,
                &[filter.as_str()],
                &[*qos],
            )?;
            if let Err(err) =
                write
                    .framing
                    .send_packet(transport, len, &deadline, &mut write.last_sent, self.keep_alive_ms())
            {
                warn!("resubscribe to {filter} failed: {err}");
            }
        }

        {
            let global = self.lock_global();
            self.set_state(&global, SessionState::Connected);
        }
        debug!("reconnected and resubscribed {} filter(s)", resubscribe_filters.len());

        let due = self.lock_global().ack_table.scan(false, self.config.cmd_timeout_ms);
        for retransmit in due {
            write.framing.write_buf_mut()[..retransmit.payload.len()]
                .copy_from_slice(&retransmit.payload);
            if let Err(err) = write.framing.send_packet(
                transport,
                retransmit.payload.len(),
                &deadline,
                &mut write.last_sent,
                self.keep_alive_ms(),
            ) {
                warn!("retransmit of packet id {} failed: {err}", retransmit.packet_id);
            }
        }

        Ok(())
    }

    /// Called at the end of every dispatcher turn (§4.F "Keep-alive"). Reads
    /// `last_received`/`ping_outstanding` under a brief global-mutex section,
    /// then acts on the copied values — the global mutex is never held
    /// across the transport `disconnect()`/`send_packet` calls below (§5).
    fn keep_alive(&self) -> Result<()> {
        if self.state() != SessionState::Connected {
            return Ok(());
        }

        let mut write = self.lock_write();

        let (expired, ping_outstanding) = {
            let global = self.lock_global();
            (global.last_received.is_expired() || write.last_sent.is_expired(), global.ping_outstanding)
        };
        if !expired {
            return Ok(());
        }

        if ping_outstanding {
            if let Some(transport) = write.transport.as_mut() {
                let _ = transport.disconnect();
            }
            write.transport = None;
            drop(write);
            let global = self.lock_global();
            self.set_state(&global, SessionState::Disconnected);
            return Err(Error::NotConnected);
        }

        let transport = write.transport.as_mut().ok_or(Error::NotConnected)?;
        let deadline = Countdown::new(self.config.cmd_timeout_ms);
        let len = mqtt_packet::serialize_pingreq(write.framing.write_buf_mut())?;
        write
            .framing
            .send_packet(transport, len, &deadline, &mut write.last_sent, self.keep_alive_ms())?;
        drop(write);
        self.lock_global().ping_outstanding = true;
        Ok(())
    }

    /// One dispatcher turn: read one packet with the worker's own read-only
    /// transport and framing, then hand it to [`dispatch_packet`] under the
    /// write mutex (so any response it sends is serialized with producer
    /// threads).
    ///
    /// The blocking read takes only a local copy of `last_received`,
    /// writing it back under a fresh, brief global-mutex acquisition on
    /// success — the global mutex is never held while `read_packet` is
    /// blocked on the transport (§5). `dispatch_packet` itself takes the
    /// global mutex only for each individual table touch it performs, not
    /// for the whole turn.
    fn dispatch_turn(&self, read_transport: &mut dyn Transport, read_framing: &mut Framing) -> Result<()> {
        let read_deadline = Countdown::new(self.config.cmd_timeout_ms);
        let mut last_received = self.lock_global().last_received;
        let n = read_framing.read_packet(read_transport, &read_deadline, &mut last_received, self.keep_alive_ms())?;
        self.lock_global().last_received = last_received;

        let raw = read_framing.read_buf()[..n].to_vec();

        let mut write = self.lock_write();
        let transport = write.transport.as_mut().ok_or(Error::NotConnected)?;
        let send_deadline = Countdown::new(self.config.cmd_timeout_ms);

        let mut call_interceptor = |delivery: &crate::subscription::Delivery| {
            if let Some(interceptor) = &self.interceptor {
                interceptor(delivery);
            }
        };

        let mut ctx = DispatchContext {
            session: self,
            framing: &mut write.framing,
            transport,
            deadline: &send_deadline,
            last_sent: &mut write.last_sent,
            keep_alive_ms: self.keep_alive_ms(),
            cmd_timeout_ms: self.config.cmd_timeout_ms,
            interceptor: if self.interceptor.is_some() {
                Some(&mut call_interceptor)
            } else {
                None
            },
        };
        dispatch_packet(&mut ctx, &raw)
    }

    /// The public polling entry point (§4.F `yield`), also used internally
    /// by the worker loop.
    pub fn yield_now(self: &Arc<Self>, timeout_ms: u64) -> Result<()> {
        let deadline = Countdown::new(timeout_ms);
        let mut read_framing = Framing::new(self.config.read_buf_size, 0);
        let mut read_transport = {
            let write = self.lock_write();
            write.transport.as_ref().and_then(|t| t.try_clone().ok())
        };

        while !deadline.is_expired() {
            match self.state() {
                SessionState::CleanSession => return Err(Error::CleanSession),
                SessionState::Connected => {
                    if let Some(transport) = read_transport.as_mut() {
                        match self.dispatch_turn(transport.as_mut(), &mut read_framing) {
                            Ok(()) => {}
                            Err(Error::NothingToRead) => {}
                            Err(err) => log_worker_error("dispatcher turn", &err),
                        }
                    }
                    self.lock_global().ack_table.scan(true, self.config.cmd_timeout_ms);
                    self.keep_alive()?;
                }
                _ => {
                    self.reconnect()?;
                    read_transport = {
                        let write = self.lock_write();
                        write.transport.as_ref().and_then(|t| t.try_clone().ok())
                    };
                }
            }
        }
        Ok(())
    }

    /// The background worker (§4.F "Worker loop"). Exits and tears down
    /// session resources once `CLEAN_SESSION` is observed.
    fn worker_loop(self: Arc<Self>, mut read_transport: Box<dyn Transport>) {
        if self.state() != SessionState::Connected {
            warn!("worker started while session was not connected; exiting");
            return;
        }

        let mut read_framing = Framing::new(self.config.read_buf_size, 0);

        loop {
            match self.state() {
                SessionState::CleanSession => {
                    let mut write = self.lock_write();
                    if let Some(transport) = write.transport.as_mut() {
                        let _ = transport.disconnect();
                    }
                    write.transport = None;
                    self.lock_global().ack_table.clear_all();
                    let global = self.lock_global();
                    self.set_state(&global, SessionState::Invalid);
                    info!("worker exiting after clean session shutdown");
                    *self.worker.lock().expect("worker mutex poisoned") = None;
                    return;
                }
                SessionState::Connected => {
                    match self.dispatch_turn(read_transport.as_mut(), &mut read_framing) {
                        Ok(()) => {}
                        Err(Error::NothingToRead) => {}
                        Err(err) => log_worker_error("dispatcher turn", &err),
                    }
                    self.lock_global().ack_table.scan(true, self.config.cmd_timeout_ms);
                    if let Err(err) = self.keep_alive() {
                        log_worker_error("keep alive", &err);
                    }
                }
                _ => match self.reconnect() {
                    Ok(()) => {
                        if let Some(write) = self.lock_write().transport.as_ref().and_then(|t| t.try_clone().ok()) {
                            read_transport = write;
                        }
                    }
                    Err(Error::ReconnectTimeout) => {
                        debug!("reconnect attempt failed, retrying");
                    }
                    Err(err) => log_worker_error("reconnect", &err),
                },
            }
        }
    }
}

fn read_one_packet(transport: &mut dyn Transport, buf: &mut [u8], deadline: &Countdown) -> Result<usize> {
    let mut framing = Framing::new(buf.len(), 0);
    let mut dummy = Countdown::expired();
    let n = framing.read_packet(transport, deadline, &mut dummy, 0)?;
    buf[..n].copy_from_slice(&framing.read_buf()[..n]);
    Ok(n)
}
