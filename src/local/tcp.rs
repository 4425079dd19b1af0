//! Local transport over `std::net` TCP.
//!
//! The listener and accepted streams run in non-blocking mode so a tick never
//! waits on a quiet client. Writes switch the stream to blocking for their
//! duration, bounded by the write timeout, so a streamed response is not cut
//! short by a full send buffer.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::debug;

use super::{LocalConnection, LocalTransport};

/// Listens on a TCP address.
pub struct TcpTransport {
    addr: String,
    listener: Option<TcpListener>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            listener: None,
        }
    }

    /// Bound address, once listening. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

impl LocalTransport for TcpTransport {
    type Connection = TcpConnection;

    fn listen(&mut self) -> io::Result<()> {
        let listener = TcpListener::bind(&self.addr)?;
        listener.set_nonblocking(true)?;
        debug!(addr = %self.addr, "Local: bound listener");
        self.listener = Some(listener);
        Ok(())
    }

    fn accept(&mut self) -> io::Result<Option<TcpConnection>> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(None);
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                Ok(Some(TcpConnection::new(stream, peer)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One accepted client socket.
pub struct TcpConnection {
    reader: BufReader<TcpStream>,
    peer: SocketAddr,
    closed: bool,
}

impl TcpConnection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            reader: BufReader::new(stream),
            peer,
            closed: false,
        }
    }

    fn stream(&self) -> &TcpStream {
        self.reader.get_ref()
    }

    /// Buffered bytes, or `None` when nothing is ready (or the peer is gone).
    fn available(&mut self) -> io::Result<Option<&[u8]>> {
        if self.closed {
            return Ok(None);
        }
        match self.reader.fill_buf() {
            Ok([]) => Ok(None),
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl LocalConnection for TcpConnection {
    fn peek_byte(&mut self) -> Option<u8> {
        self.available().ok().flatten().and_then(|b| b.first().copied())
    }

    fn read_until(&mut self, terminator: u8, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            let Some(available) = self.available()? else {
                break;
            };
            let room = buf.len() - n;
            let window = &available[..available.len().min(room)];
            let (take, found) = match window.iter().position(|&b| b == terminator) {
                Some(i) => (i + 1, true),
                None => (window.len(), false),
            };
            buf[n..n + take].copy_from_slice(&window[..take]);
            self.reader.consume(take);
            n += take;
            if found {
                break;
            }
        }
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(available) = self.available()? else {
            return Ok(0);
        };
        let take = available.len().min(buf.len());
        buf[..take].copy_from_slice(&available[..take]);
        self.reader.consume(take);
        Ok(take)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        let stream = self.stream();
        if let Err(e) = stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
        {
            debug!(peer = %self.peer, "Local: failed to set socket timeout: {e}");
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let mut stream = self.stream();
        stream.set_nonblocking(false)?;
        let result = stream.write_all(bytes);
        stream.set_nonblocking(true)?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut stream = self.stream();
        stream.flush()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream().shutdown(Shutdown::Both) {
            debug!(peer = %self.peer, "Local: shutdown failed: {e}");
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}
