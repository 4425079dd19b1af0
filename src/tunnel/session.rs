//! Relay connection lifecycle and forwarded-request handling.
//!
//! ```text
//! Disconnected --(retry due)--> Connecting --(opened)--> Connected
//!      ^                            |                        |
//!      +--(closed / timed out)------+----(closed / dead)-----+
//! ```
//!
//! The first attempt happens on the first tick. After a connected link drops,
//! the next attempt waits `reconnect_first`; every failed attempt after that
//! waits `reconnect_interval`. While connected, a ping goes out every
//! `heartbeat.interval`; a ping unanswered for `heartbeat.timeout` counts as
//! missed, and reaching `heartbeat.max_missed` drops the link.
//!
//! Each tick handles at most one inbound event. A `FWD:` frame is parsed,
//! routed and answered with a `RES:` frame before the tick returns.

use std::mem;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::frame::{self, RequestId, ResponsePreamble};
use super::{Fragment, TransportError, TunnelEndpoint, TunnelEvent, TunnelTransport};
use crate::http::{FixedBuffer, Request, Response, ResponseSink, SinkError, StreamWriter};
use crate::router::Router;
use crate::state::{ConnectionHealth, HealthHandle};

/// Heartbeat probe schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_missed: u32,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(5),
            max_missed: 1,
        }
    }
}

/// Everything the session needs to reach and talk to the relay.
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub endpoint: TunnelEndpoint,
    /// Delay before the first attempt after a connected link drops.
    pub reconnect_first: Duration,
    /// Delay between later attempts.
    pub reconnect_interval: Duration,
    /// How long an attempt may stay unanswered before it counts as failed.
    pub connect_timeout: Duration,
    pub heartbeat: HeartbeatPolicy,
    /// Capacity of the response writer; larger responses go out in parts.
    pub response_buffer_size: usize,
}

impl TunnelOptions {
    pub fn new(endpoint: TunnelEndpoint) -> Self {
        Self {
            endpoint,
            reconnect_first: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            heartbeat: HeartbeatPolicy::default(),
            response_buffer_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelPhase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
struct Heartbeat {
    next_ping: Instant,
    /// When the outstanding probe was sent.
    outstanding: Option<Instant>,
    missed: u32,
}

impl Heartbeat {
    fn new(now: Instant, policy: &HeartbeatPolicy) -> Self {
        Self {
            next_ping: now + policy.interval,
            outstanding: None,
            missed: 0,
        }
    }

    fn pong(&mut self) {
        self.outstanding = None;
        self.missed = 0;
    }
}

#[derive(Debug)]
enum Link {
    Disconnected { retry_at: Option<Instant> },
    Connecting { since: Instant },
    Connected { heartbeat: Heartbeat },
    Stopped,
}

pub struct TunnelSession {
    transport: Box<dyn TunnelTransport>,
    options: TunnelOptions,
    link: Link,
    health: HealthHandle,
    output: FixedBuffer,
    attempts: u64,
}

impl TunnelSession {
    pub fn new(
        transport: Box<dyn TunnelTransport>,
        options: TunnelOptions,
        health: HealthHandle,
    ) -> Self {
        Self {
            transport,
            output: FixedBuffer::new(options.response_buffer_size),
            options,
            link: Link::Disconnected { retry_at: None },
            health,
            attempts: 0,
        }
    }

    pub fn phase(&self) -> TunnelPhase {
        match self.link {
            Link::Disconnected { .. } | Link::Stopped => TunnelPhase::Disconnected,
            Link::Connecting { .. } => TunnelPhase::Connecting,
            Link::Connected { .. } => TunnelPhase::Connected,
        }
    }

    pub fn health(&self) -> &HealthHandle {
        &self.health
    }

    /// When the next connection attempt is due, if disconnected.
    pub fn next_attempt(&self) -> Option<Instant> {
        match self.link {
            Link::Disconnected { retry_at } => retry_at,
            _ => None,
        }
    }

    pub fn options(&self) -> &TunnelOptions {
        &self.options
    }

    pub fn tick(&mut self, now: Instant, router: &Router) {
        match self.link {
            Link::Disconnected { retry_at } => {
                if retry_at.is_none_or(|at| now >= at) {
                    self.start_connect(now);
                }
            }
            Link::Connecting { since } => self.poll_connecting(since, now),
            Link::Connected { .. } => {
                if let Some(event) = self.transport.receive() {
                    self.on_connected_event(event, now, router);
                }
                self.poll_heartbeat(now);
            }
            Link::Stopped => {}
        }
    }

    /// Drop the link for good. Later ticks do nothing.
    pub fn shutdown(&mut self, now: Instant) {
        if matches!(self.link, Link::Stopped) {
            return;
        }
        info!("Tunnel: shutting down");
        self.transport.close();
        if self.health.health() == ConnectionHealth::Connected {
            self.health.set(ConnectionHealth::Disconnected, now);
        }
        self.link = Link::Stopped;
    }

    fn start_connect(&mut self, now: Instant) {
        self.attempts += 1;
        if self.attempts > 1 {
            self.health.record_reconnect();
        }
        info!(attempt = self.attempts, "Tunnel: connecting to {}", self.options.endpoint);
        match self.transport.connect(&self.options.endpoint) {
            Ok(()) => self.link = Link::Connecting { since: now },
            Err(e) => self.attempt_failed(now, &e),
        }
    }

    fn poll_connecting(&mut self, since: Instant, now: Instant) {
        match self.transport.receive() {
            Some(TunnelEvent::Opened) => {
                info!("Tunnel: connected");
                self.health.set(ConnectionHealth::Connected, now);
                self.link = Link::Connected {
                    heartbeat: Heartbeat::new(now, &self.options.heartbeat),
                };
            }
            Some(TunnelEvent::Closed) => {
                self.attempt_failed(now, &TransportError::Connect("closed by peer".into()));
            }
            Some(TunnelEvent::Error(e)) => {
                self.transport.close();
                self.attempt_failed(now, &TransportError::Connect(e));
            }
            Some(other) => debug!(?other, "Tunnel: ignoring event while connecting"),
            None => {
                if now.saturating_duration_since(since) >= self.options.connect_timeout {
                    self.transport.close();
                    self.attempt_failed(now, &TransportError::Connect("timed out".into()));
                }
            }
        }
    }

    /// A connection attempt failed. Health keeps its value: a failed attempt
    /// after a drop stays `Disconnected`, a never-connected link stays
    /// `UnableToConnect`.
    fn attempt_failed(&mut self, now: Instant, error: &TransportError) {
        let retry_at = now + self.options.reconnect_interval;
        warn!(
            "Tunnel: {error}, retrying in {}s",
            self.options.reconnect_interval.as_secs()
        );
        self.link = Link::Disconnected {
            retry_at: Some(retry_at),
        };
    }

    /// A live link went away.
    fn link_lost(&mut self, now: Instant, reason: &str) {
        warn!(
            "Tunnel: link lost ({reason}), reconnecting in {}ms",
            self.options.reconnect_first.as_millis()
        );
        self.transport.close();
        self.health.set(ConnectionHealth::Disconnected, now);
        self.link = Link::Disconnected {
            retry_at: Some(now + self.options.reconnect_first),
        };
    }

    fn on_connected_event(&mut self, event: TunnelEvent, now: Instant, router: &Router) {
        match event {
            TunnelEvent::Text(message) => self.handle_message(&message, router),
            TunnelEvent::Pong => {
                if let Link::Connected { heartbeat } = &mut self.link {
                    heartbeat.pong();
                }
            }
            TunnelEvent::Ping => debug!("Tunnel: ping from relay"),
            TunnelEvent::Closed => self.link_lost(now, "closed by peer"),
            TunnelEvent::Error(e) => self.link_lost(now, &e),
            TunnelEvent::Opened => debug!("Tunnel: duplicate open event"),
        }
    }

    fn poll_heartbeat(&mut self, now: Instant) {
        let policy = self.options.heartbeat;
        let Link::Connected { heartbeat } = &mut self.link else {
            return;
        };

        if let Some(sent) = heartbeat.outstanding {
            if now.saturating_duration_since(sent) < policy.timeout {
                return;
            }
            heartbeat.outstanding = None;
            heartbeat.missed += 1;
            self.health.record_missed_heartbeat();
            warn!(
                missed = heartbeat.missed,
                max = policy.max_missed,
                "Tunnel: heartbeat timed out"
            );
            if heartbeat.missed >= policy.max_missed {
                self.link_lost(now, "heartbeat timeout");
            }
            return;
        }

        if now < heartbeat.next_ping {
            return;
        }
        heartbeat.next_ping = now + policy.interval;
        match self.transport.ping() {
            Ok(()) => heartbeat.outstanding = Some(now),
            Err(e) => self.link_lost(now, &e.to_string()),
        }
    }

    fn handle_message(&mut self, message: &[u8], router: &Router) {
        if !frame::is_forward(message) {
            debug!(len = message.len(), "Tunnel: ignoring non-request message");
            return;
        }
        let forwarded = match frame::decode_forward(message) {
            Ok(f) => f,
            Err(e) => {
                warn!("Tunnel: dropping malformed frame: {e}");
                return;
            }
        };
        let id = forwarded.id;
        self.health.record_forwarded();

        let parsed = Request::parse_frame(forwarded.payload);
        let path = parsed.as_ref().map_or("-", |r| r.path());

        let mut sink = TunnelSink::new(&mut *self.transport);
        let (ok, flushed, status) = {
            let mut writer = StreamWriter::with_buffer(mem::take(&mut self.output));
            writer.write_formatted(format_args!("{}", ResponsePreamble(id)));
            writer.enable_sink(&mut sink);
            let mut response = Response::new(writer);
            router.respond(&parsed, &mut response);
            let ok = response.finish();
            let flushed = response.writer().flushed_length();
            let status = response.status();
            self.output = response.into_writer().into_buffer();
            (ok, flushed, status)
        };

        if ok {
            debug!(request_id = %id, path, status, "Tunnel: response sent");
            return;
        }
        if flushed == 0 {
            warn!(request_id = %id, path, "Tunnel: invalid response, sending 500");
            send_internal_error(&mut *sink.transport, id);
        } else {
            warn!(request_id = %id, path, flushed, "Tunnel: response broke mid-stream");
            sink.abort();
        }
    }
}

fn send_internal_error(transport: &mut dyn TunnelTransport, id: RequestId) {
    let frame = frame::internal_error_frame(id);
    if let Err(e) = transport.send(frame.as_bytes(), Fragment::Whole) {
        debug!(request_id = %id, "Tunnel: failed to send 500: {e}");
    }
}

/// Sends each flushed chunk as one message part.
struct TunnelSink<'t> {
    transport: &'t mut dyn TunnelTransport,
    started: bool,
    ended: bool,
}

impl<'t> TunnelSink<'t> {
    fn new(transport: &'t mut dyn TunnelTransport) -> Self {
        Self {
            transport,
            started: false,
            ended: false,
        }
    }

    /// Close a stream left open by a failed response.
    fn abort(&mut self) {
        if self.started && !self.ended {
            self.ended = true;
            if let Err(e) = self.transport.send(&[], Fragment::Last) {
                debug!("Tunnel: failed to close response stream: {e}");
            }
        }
    }
}

impl ResponseSink for TunnelSink<'_> {
    fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        let fragment = if self.started {
            Fragment::Continue
        } else {
            Fragment::First
        };
        self.started = true;
        Ok(self.transport.send(chunk, fragment)?)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn end(&mut self, tail: &[u8]) -> Result<(), SinkError> {
        let fragment = if self.started {
            Fragment::Last
        } else {
            Fragment::Whole
        };
        self.ended = true;
        Ok(self.transport.send(tail, fragment)?)
    }
}
