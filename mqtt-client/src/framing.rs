use log::trace;

use mqtt_core::decode_remaining_length;

use crate::error::{Error, Result};
use crate::platform::Countdown;
use crate::transport::Transport;

/// Reads one MQTT control packet, or writes a pre-serialized buffer, over a
/// [`Transport`] with a deadline (§4.A). Owns the read and write buffers;
/// the engine never grows them implicitly (§3 "Buffers").
pub struct Framing {
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Framing {
    pub fn new(read_buf_size: usize, write_buf_size: usize) -> Self {
        Framing {
            read_buf: vec![0u8; read_buf_size],
            write_buf: vec![0u8; write_buf_size],
        }
    }

    pub fn write_buf_mut(&mut self) -> &mut [u8] {
        &mut self.write_buf
    }

    pub fn write_buf(&self) -> &[u8] {
        &self.write_buf
    }

    pub fn read_buf(&self) -> &[u8] {
        &self.read_buf
    }

    /// Reads one control packet into the read buffer and returns the number
    /// of bytes it occupies (fixed header + body). The decoded remaining
    /// length is re-encoded back into the read buffer after the fixed
    /// header byte, so the caller sees the full raw packet exactly as it
    /// would have arrived on the wire with a canonical varint encoding.
    pub fn read_packet(
        &mut self,
        transport: &mut dyn Transport,
        deadline: &Countdown,
        last_received: &mut Countdown,
        keep_alive_ms: u64,
    ) -> Result<usize> {
        let first = self.read_exact_one(transport, deadline)?;

        let mut varint = [0u8; 4];
        let mut varint_len = 0;
        let remaining_length = loop {
            if varint_len == 4 {
                return Err(Error::BufferTooShort);
            }
            let byte = self.read_exact_one(transport, deadline)?;
            varint[varint_len] = byte;
            varint_len += 1;

            if byte & 0x80 == 0 {
                let (value, _) = decode_remaining_length(&varint[..varint_len])
                    .map_err(|_| Error::BufferTooShort)?;
                break value;
            }
        };

        let header_len = 1 + varint_len;
        if header_len + remaining_length > self.read_buf.len() {
            self.drain(transport, remaining_length, deadline)?;
            return Err(Error::BufferTooShort);
        }

        self.read_buf[0] = first;
        self.read_buf[1..header_len].copy_from_slice(&varint[..varint_len]);

        let mut read = 0;
        while read < remaining_length {
            if deadline.is_expired() {
                return Err(Error::NothingToRead);
            }
            let n = transport.read(
                &mut self.read_buf[header_len + read..header_len + remaining_length],
                deadline.remain_ms(),
            )?;
            read += n;
        }

        last_received.reset(keep_alive_ms);
        trace!("read packet: {:02x?}", &self.read_buf[..header_len + remaining_length]);

        Ok(header_len + remaining_length)
    }

    fn read_exact_one(&self, transport: &mut dyn Transport, deadline: &Countdown) -> Result<u8> {
        let mut byte = [0u8; 1];
        loop {
            if deadline.is_expired() {
                return Err(Error::NothingToRead);
            }
            let n = transport.read(&mut byte, deadline.remain_ms())?;
            if n == 1 {
                return Ok(byte[0]);
            }
        }
    }

    /// Discards exactly `remaining` bytes from the transport without
    /// buffering them, bounding the total wait by `deadline` so a transport
    /// that returns `Ok(0)` with no error cannot spin forever (Design Notes
    /// open question on `mqtt_packet_drain`).
    fn drain(&self, transport: &mut dyn Transport, mut remaining: usize, deadline: &Countdown) -> Result<()> {
        let mut scratch = [0u8; 256];
        while remaining > 0 {
            if deadline.is_expired() {
                return Err(Error::NothingToRead);
            }
            let want = remaining.min(scratch.len());
            let n = transport.read(&mut scratch[..want], deadline.remain_ms())?;
            if n == 0 {
                continue;
            }
            remaining -= n;
        }
        Ok(())
    }

    /// Writes `length` bytes of the write buffer, honoring partial writes.
    pub fn send_packet(
        &mut self,
        transport: &mut dyn Transport,
        length: usize,
        deadline: &Countdown,
        last_sent: &mut Countdown,
        keep_alive_ms: u64,
    ) -> Result<()> {
        trace!("write packet: {:02x?}", &self.write_buf[..length]);

        let mut written = 0;
        while written < length {
            if deadline.is_expired() {
                return Err(Error::SendFailed);
            }
            let n = transport.write(&self.write_buf[written..length], deadline.remain_ms())?;
            if n == 0 {
                return Err(Error::SendFailed);
            }
            written += n;
        }

        last_sent.reset(keep_alive_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use std::io;

    struct LoopbackTransport {
        inbound: std::collections::VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl LoopbackTransport {
        fn with_inbound(bytes: Vec<u8>) -> Self {
            LoopbackTransport {
                inbound: bytes.into(),
                outbound: Vec::new(),
            }
        }
    }

    impl Transport for LoopbackTransport {
        fn connect(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], _timeout_ms: u64) -> io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.inbound.pop_front() {
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
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn disconnect(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "loopback transport cannot be cloned"))
        }
    }

    #[test]
    fn reads_a_short_publish_packet_whole() {
        let mut buf = [0u8; 64];
        let len = mqtt_packet::serialize_publish(
            &mut buf,
            false,
            mqtt_core::QoS::AtMostOnce,
            false,
            None,
            "t",
            b"hi",
        )
        .unwrap();

        let mut transport = LoopbackTransport::with_inbound(buf[..len].to_vec());
        let mut framing = Framing::new(64, 64);
        let deadline = Countdown::new(1_000);
        let mut last_received = Countdown::expired();

        let read = framing
            .read_packet(&mut transport, &deadline, &mut last_received, 60_000)
            .unwrap();

        assert_eq!(read, len);
        assert_eq!(&framing.read_buf()[..len], &buf[..len]);
    }

    #[test]
    fn drains_and_reports_buffer_too_short_when_packet_exceeds_read_buffer() {
        let mut buf = [0u8; 64];
        let len = mqtt_packet::serialize_publish(
            &mut buf,
            false,
            mqtt_core::QoS::AtMostOnce,
            false,
            None,
            "topic",
            &[b'x'; 40],
        )
        .unwrap();

        let mut transport = LoopbackTransport::with_inbound(buf[..len].to_vec());
        let mut framing = Framing::new(16, 16);
        let deadline = Countdown::new(1_000);
        let mut last_received = Countdown::expired();

        let result = framing.read_packet(&mut transport, &deadline, &mut last_received, 60_000);
        assert!(matches!(result, Err(Error::BufferTooShort)));
        assert!(transport.inbound.is_empty());
    }
}
