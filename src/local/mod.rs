//! Direct (same-network) HTTP path.
//!
//! The engine talks to the platform socket layer only through
//! [`LocalTransport`] and [`LocalConnection`]; `tcp` provides the adapter for
//! hosts with a std TCP stack. [`session::LocalSession`] is the per-connection
//! state machine driven from the scheduler tick.

pub mod session;
pub mod tcp;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::http::{ResponseSink, SinkError};

/// Listening side of the local transport. One connection is serviced at a time.
pub trait LocalTransport {
    type Connection: LocalConnection;

    /// Start listening. Called once before the first tick.
    fn listen(&mut self) -> io::Result<()>;

    /// Take a pending connection without blocking. `Ok(None)` when none is waiting.
    fn accept(&mut self) -> io::Result<Option<Self::Connection>>;
}

/// One accepted client connection.
pub trait LocalConnection {
    /// Next unread byte without consuming it, or `None` if nothing has arrived.
    fn peek_byte(&mut self) -> Option<u8>;

    /// Whether at least one byte can be read without waiting.
    fn has_data(&mut self) -> bool {
        self.peek_byte().is_some()
    }

    /// Read into `buf` up to and including `terminator`, stopping early when
    /// `buf` is full or the input runs dry. Returns the byte count.
    fn read_until(&mut self, terminator: u8, buf: &mut [u8]) -> io::Result<usize>;

    /// Read whatever is available into `buf`, at most `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Upper bound for any single blocking read.
    fn set_timeout(&mut self, timeout: Duration);

    /// Write all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Release the connection. Further calls are no-ops.
    fn close(&mut self);

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Streams response output straight onto a local connection.
pub struct ConnectionSink<'c, C: LocalConnection> {
    conn: &'c mut C,
}

impl<'c, C: LocalConnection> ConnectionSink<'c, C> {
    pub fn new(conn: &'c mut C) -> Self {
        Self { conn }
    }
}

impl<C: LocalConnection> ResponseSink for ConnectionSink<'_, C> {
    fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        Ok(self.conn.write(chunk)?)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(self.conn.flush()?)
    }

    fn end(&mut self, tail: &[u8]) -> Result<(), SinkError> {
        self.conn.write(tail)?;
        Ok(self.conn.flush()?)
    }
}
