use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// Byte-oriented transport collaborator (§6 "Transport"). TLS is a
/// configuration detail of the implementer; the core only branches on
/// whether a CA blob was configured when deciding which transport to build.
pub trait Transport: Send {
    fn connect(&mut self) -> io::Result<()>;

    /// Reads up to `buf.len()` bytes with a timeout. Returns `Ok(0)` on EOF
    /// or on timeout with nothing available, matching `TcpStream`'s
    /// `read_timeout` behavior (`WouldBlock`/`TimedOut` surfaced as an error
    /// by most implementations; callers treat a zero-length read with no
    /// error as "nothing yet").
    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8], timeout_ms: u64) -> io::Result<usize>;

    fn disconnect(&mut self) -> io::Result<()>;

    /// Produces an independent handle onto the same connection, so the
    /// worker thread can hold a read-capable handle while [`WriteSide`]
    /// retains the write-capable one (§5 lock ordering), grounded on the
    /// teacher's `io::TryClone`.
    ///
    /// [`WriteSide`]: crate::session::WriteSide
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// Plain TCP transport, grounded on the teacher's `connect::Connector` which
/// builds a bare `TcpStream` and hands it to `Framed`.
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        TcpTransport {
            host: host.into(),
            port,
            stream: None,
        }
    }

    fn stream_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport not connected"))
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> io::Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> io::Result<usize> {
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1))))?;
        use io::Read;
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn write(&mut self, buf: &[u8], timeout_ms: u64) -> io::Result<usize> {
        let stream = self.stream_mut()?;
        stream.set_write_timeout(Some(Duration::from_millis(timeout_ms.max(1))))?;
        use io::Write;
        stream.write(buf)
    }

    fn disconnect(&mut self) -> io::Result<()> {
        self.stream = None;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport not connected"))?
            .try_clone()?;
        Ok(Box::new(TcpTransport {
            host: self.host.clone(),
            port: self.port,
            stream: Some(stream),
        }))
    }
}
