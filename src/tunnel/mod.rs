//! Outbound relay tunnel.
//!
//! The device keeps one long-lived duplex connection to a relay. The relay
//! forwards third-party HTTP requests as `FWD:` frames and expects a `RES:`
//! frame carrying the same correlation id for each.
//!
//! - [`frame`]: the `FWD:`/`RES:` wire framing.
//! - [`session`]: connection lifecycle, heartbeat and request dispatch.
//! - [`ws`]: [`TunnelTransport`] over a tokio-tungstenite WebSocket.

pub mod frame;
pub mod session;
pub mod ws;

use std::fmt;

use thiserror::Error;

/// Failure reported by a tunnel transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("tunnel not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// Where a message sits in a logical multi-part stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    /// A complete message on its own.
    Whole,
    /// Opens a stream; more parts follow.
    First,
    /// A middle part.
    Continue,
    /// Closes the stream.
    Last,
}

impl Fragment {
    /// Whether this part completes the logical message.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Whole | Self::Last)
    }
}

/// Event surfaced by [`TunnelTransport::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    Opened,
    Closed,
    Text(Vec<u8>),
    Ping,
    Pong,
    /// The link failed. A connected session treats it as a drop.
    Error(String),
}

/// Relay address. The device key is sent as a query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

impl TunnelEndpoint {
    /// Endpoint for `device_key` under `base_path` (for example `/socket/v1`).
    pub fn for_device(
        host: impl Into<String>,
        port: u16,
        base_path: &str,
        secure: bool,
        device_key: &str,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            path: format!("{base_path}?deviceKey={device_key}"),
            secure,
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

impl fmt::Display for TunnelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The path carries the device key, keep it out of logs.
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Duplex message transport to the relay, polled from the scheduler tick.
///
/// Implementations must not block: `connect` starts an attempt whose outcome
/// is reported later as [`TunnelEvent::Opened`] or [`TunnelEvent::Closed`].
pub trait TunnelTransport {
    /// Begin connecting. Any existing connection is dropped first.
    fn connect(&mut self, endpoint: &TunnelEndpoint) -> Result<(), TransportError>;

    /// Queue one message part.
    fn send(&mut self, bytes: &[u8], fragment: Fragment) -> Result<(), TransportError>;

    /// Next pending event, if any.
    fn receive(&mut self) -> Option<TunnelEvent>;

    /// Send a heartbeat probe. A reply arrives as [`TunnelEvent::Pong`].
    fn ping(&mut self) -> Result<(), TransportError>;

    /// Drop the connection. No `Closed` event is required afterwards.
    fn close(&mut self);
}
