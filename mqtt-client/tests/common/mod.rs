//! Shared scaffolding for integration tests: an in-memory duplex transport
//! standing in for a broker connection, plus raw-byte builders for the
//! broker-to-client packet kinds `mqtt-packet` has no encoder for (this
//! crate only serializes what a client sends).

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mqtt_client::{ClientConfig, Transport};
use mqtt_core::encode_remaining_length;

/// A duplex in-memory channel. `inbound` is bytes the test feeds as if a
/// broker sent them; `outbound` is bytes the client under test has written.
/// `try_clone` hands back a handle sharing the same queues, mirroring how
/// `TcpTransport::try_clone` shares one socket across two handles.
#[derive(Clone)]
pub struct ChannelTransport {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Arc<Mutex<VecDeque<u8>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        ChannelTransport {
            inbound: Arc::new(Mutex::new(VecDeque::new())),
            outbound: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend(bytes);
    }

    pub fn take_outbound(&self) -> Vec<u8> {
        self.outbound.lock().unwrap().drain(..).collect()
    }
}

impl Transport for ChannelTransport {
    fn connect(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout_ms: u64) -> io::Result<usize> {
        let mut inbound = self.inbound.lock().unwrap();
        let mut n = 0;
        while n < buf.len() {
            match inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], _timeout_ms: u64) -> io::Result<usize> {
        self.outbound.lock().unwrap().extend(buf);
        Ok(buf.len())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

pub fn fast_config(client_id: &str) -> ClientConfig {
    ClientConfig::builder(client_id, "test-broker", 1883)
        .cmd_timeout_ms(150)
        .build()
}

/// Raw CONNACK bytes: accepted, no session present.
pub fn connack_accepted() -> Vec<u8> {
    vec![0x20, 0x02, 0x00, 0x00]
}

/// Raw SUBACK bytes for one filter.
pub fn suback(packet_id: u16, granted_qos: u8) -> Vec<u8> {
    let mut out = vec![0x90];
    let mut len_buf = [0u8; 4];
    let len = encode_remaining_length(&mut len_buf, 3).unwrap();
    out.extend_from_slice(&len_buf[..len]);
    out.extend_from_slice(&packet_id.to_be_bytes());
    out.push(granted_qos);
    out
}

/// Raw UNSUBACK bytes.
pub fn unsuback(packet_id: u16) -> Vec<u8> {
    vec![0xB0, 0x02, (packet_id >> 8) as u8, packet_id as u8]
}

/// Raw broker-to-client PUBLISH bytes (QoS>0 carries a packet id).
pub fn broker_publish(topic: &str, payload: &[u8], qos: u8, dup: bool, packet_id: Option<u16>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    if qos > 0 {
        let id = packet_id.expect("QoS>0 publish needs a packet id");
        body.extend_from_slice(&id.to_be_bytes());
    }
    body.extend_from_slice(payload);

    let mut flags = qos << 1;
    if dup {
        flags |= 0b1000;
    }

    let mut out = vec![0x30 | flags];
    let mut len_buf = [0u8; 4];
    let len = encode_remaining_length(&mut len_buf, body.len()).unwrap();
    out.extend_from_slice(&len_buf[..len]);
    out.extend_from_slice(&body);
    out
}

/// Raw PUBREL bytes (reserved flags `0b0010`).
pub fn pubrel(packet_id: u16) -> Vec<u8> {
    vec![0x62, 0x02, (packet_id >> 8) as u8, packet_id as u8]
}

/// Raw PINGRESP bytes.
pub fn pingresp() -> Vec<u8> {
    vec![0xD0, 0x00]
}

/// Polls `cond` until it returns true or `timeout` elapses, returning whether
/// it succeeded. Used instead of a fixed sleep since the worker thread's
/// turnaround time is not deterministic.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
