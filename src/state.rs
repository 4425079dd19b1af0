//! Connection health shared between the tunnel session and status reporting.
//!
//! Only the tunnel session writes; handlers and the embedding program read
//! through cloned [`HealthHandle`]s. Everything runs on the tick thread, so
//! plain `Cell`s suffice.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Relay connection health as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionHealth {
    /// No tunnel configured.
    NotEnabled,
    /// Never connected, or every attempt since the last drop failed.
    UnableToConnect,
    /// Was connected; the link has since been lost.
    Disconnected,
    Connected,
}

impl ConnectionHealth {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotEnabled => "not_enabled",
            Self::UnableToConnect => "unable_to_connect",
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of the shared state, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub health: ConnectionHealth,
    pub since_change_ms: u64,
    pub reconnects: u64,
    pub forwarded_requests: u64,
    pub missed_heartbeats: u64,
}

struct Shared {
    health: Cell<ConnectionHealth>,
    changed_at: Cell<Instant>,
    reconnects: Cell<u64>,
    forwarded: Cell<u64>,
    missed_heartbeats: Cell<u64>,
}

/// Cheap-to-clone, single-threaded view of the tunnel's health.
#[derive(Clone)]
pub struct HealthHandle(Rc<Shared>);

impl HealthHandle {
    pub fn new(initial: ConnectionHealth, now: Instant) -> Self {
        Self(Rc::new(Shared {
            health: Cell::new(initial),
            changed_at: Cell::new(now),
            reconnects: Cell::new(0),
            forwarded: Cell::new(0),
            missed_heartbeats: Cell::new(0),
        }))
    }

    pub fn health(&self) -> ConnectionHealth {
        self.0.health.get()
    }

    /// When the health last changed value.
    pub fn changed_at(&self) -> Instant {
        self.0.changed_at.get()
    }

    pub fn time_since_change(&self) -> Duration {
        self.time_since_change_at(Instant::now())
    }

    pub fn time_since_change_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.changed_at())
    }

    /// Record a new health value. Re-setting the current value keeps the
    /// original timestamp.
    pub fn set(&self, health: ConnectionHealth, now: Instant) {
        if self.0.health.replace(health) != health {
            self.0.changed_at.set(now);
        }
    }

    pub(crate) fn record_reconnect(&self) {
        bump(&self.0.reconnects);
    }

    pub(crate) fn record_forwarded(&self) {
        bump(&self.0.forwarded);
    }

    pub(crate) fn record_missed_heartbeat(&self) {
        bump(&self.0.missed_heartbeats);
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        HealthSnapshot {
            health: self.health(),
            since_change_ms: self.time_since_change_at(now).as_millis() as u64,
            reconnects: self.0.reconnects.get(),
            forwarded_requests: self.0.forwarded.get(),
            missed_heartbeats: self.0.missed_heartbeats.get(),
        }
    }
}

impl fmt::Debug for HealthHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthHandle")
            .field("health", &self.health())
            .field("changed_at", &self.changed_at())
            .finish_non_exhaustive()
    }
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get().saturating_add(1));
}
