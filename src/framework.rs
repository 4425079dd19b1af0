//! Embedding facade: one route table served over the local listener and,
//! optionally, the relay tunnel.
//!
//! ```no_run
//! # use otf::framework::Framework;
//! # use otf::local::{session::LocalLimits, tcp::TcpTransport};
//! let mut otf = Framework::new(TcpTransport::new("0.0.0.0:8080"), LocalLimits::default());
//! otf.on("/uptime", |_req, res| {
//!     res.write_status(200, "OK");
//!     res.write_body("42");
//! });
//! loop {
//!     otf.tick();
//! #   break;
//! }
//! ```

use std::time::{Duration, Instant};

use crate::http::{Method, Request, Response};
use crate::local::session::{LocalLimits, LocalSession};
use crate::local::LocalTransport;
use crate::router::Router;
use crate::state::{ConnectionHealth, HealthHandle};
use crate::tunnel::session::{TunnelOptions, TunnelSession};
use crate::tunnel::TunnelTransport;

pub struct Framework<L: LocalTransport> {
    router: Router,
    local: LocalSession<L>,
    tunnel: Option<TunnelSession>,
    health: HealthHandle,
}

impl<L: LocalTransport> Framework<L> {
    /// Local listener only. Health reports `NotEnabled`.
    pub fn new(local: L, limits: LocalLimits) -> Self {
        Self {
            router: Router::new(),
            local: LocalSession::new(local, limits),
            tunnel: None,
            health: HealthHandle::new(ConnectionHealth::NotEnabled, Instant::now()),
        }
    }

    /// Local listener plus relay tunnel. The first connection attempt is made
    /// on the first tick.
    pub fn with_tunnel(
        local: L,
        limits: LocalLimits,
        tunnel: Box<dyn TunnelTransport>,
        options: TunnelOptions,
    ) -> Self {
        let health = HealthHandle::new(ConnectionHealth::UnableToConnect, Instant::now());
        Self {
            router: Router::new(),
            local: LocalSession::new(local, limits),
            tunnel: Some(TunnelSession::new(tunnel, options, health.clone())),
            health,
        }
    }

    /// Handle `path` for any method.
    pub fn on<F>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(&Request<'_>, &mut Response<'_>) + 'static,
    {
        self.router.register(Method::Any, path, handler);
    }

    pub fn on_method<F>(&mut self, method: Method, path: impl Into<String>, handler: F)
    where
        F: Fn(&Request<'_>, &mut Response<'_>) + 'static,
    {
        self.router.register(method, path, handler);
    }

    /// Replace the default 404 handler.
    pub fn on_missing<F>(&mut self, handler: F)
    where
        F: Fn(&Request<'_>, &mut Response<'_>) + 'static,
    {
        self.router.set_not_found(handler);
    }

    /// One scheduler iteration: a step of the local session, then one of the
    /// tunnel session.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        self.local.tick(now, &self.router);
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.tick(now, &self.router);
        }
    }

    pub fn connection_health(&self) -> ConnectionHealth {
        self.health.health()
    }

    pub fn time_since_last_health_change(&self) -> Duration {
        self.health.time_since_change()
    }

    /// Shared read-only view of the health, for status handlers.
    pub fn health_handle(&self) -> HealthHandle {
        self.health.clone()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn local(&self) -> &LocalSession<L> {
        &self.local
    }

    pub fn tunnel(&self) -> Option<&TunnelSession> {
        self.tunnel.as_ref()
    }

    /// Close the tunnel. The local listener stays bound until drop.
    pub fn shutdown(&mut self) {
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.shutdown(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    use super::*;
    use crate::local::LocalConnection;
    use crate::tunnel::{Fragment, TransportError, TunnelEndpoint, TunnelEvent};

    /// Serves canned requests, one connection each, and records the replies.
    #[derive(Default)]
    struct Canned {
        requests: VecDeque<Vec<u8>>,
        replies: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    struct CannedConn {
        input: VecDeque<u8>,
        output: Vec<u8>,
        replies: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl LocalTransport for Canned {
        type Connection = CannedConn;

        fn listen(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn accept(&mut self) -> io::Result<Option<CannedConn>> {
            Ok(self.requests.pop_front().map(|r| CannedConn {
                input: r.into(),
                output: Vec::new(),
                replies: Rc::clone(&self.replies),
            }))
        }
    }

    impl LocalConnection for CannedConn {
        fn peek_byte(&mut self) -> Option<u8> {
            self.input.front().copied()
        }

        fn read_until(&mut self, terminator: u8, buf: &mut [u8]) -> io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                let Some(b) = self.input.pop_front() else { break };
                buf[n] = b;
                n += 1;
                if b == terminator {
                    break;
                }
            }
            Ok(n)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.input.len());
            for (slot, b) in buf.iter_mut().zip(self.input.drain(..n)) {
                *slot = b;
            }
            Ok(n)
        }

        fn set_timeout(&mut self, _timeout: Duration) {}

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.output.extend_from_slice(bytes);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self) {
            self.replies.borrow_mut().push(std::mem::take(&mut self.output));
        }
    }

    #[derive(Default)]
    struct Wire {
        inbound: VecDeque<TunnelEvent>,
        outbound: Vec<Vec<u8>>,
    }

    #[derive(Clone, Default)]
    struct ScriptedTunnel(Rc<RefCell<Wire>>);

    impl TunnelTransport for ScriptedTunnel {
        fn connect(&mut self, _endpoint: &TunnelEndpoint) -> Result<(), TransportError> {
            self.0.borrow_mut().inbound.push_back(TunnelEvent::Opened);
            Ok(())
        }

        fn send(&mut self, bytes: &[u8], _fragment: Fragment) -> Result<(), TransportError> {
            self.0.borrow_mut().outbound.push(bytes.to_vec());
            Ok(())
        }

        fn receive(&mut self) -> Option<TunnelEvent> {
            self.0.borrow_mut().inbound.pop_front()
        }

        fn ping(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn uptime(otf: &mut Framework<Canned>) {
        otf.on_method(Method::Get, "/uptime", |_req, res| {
            res.write_status(200, "OK");
            res.write_body("42");
        });
    }

    #[test]
    fn test_local_only_reports_not_enabled() {
        let otf = Framework::new(Canned::default(), LocalLimits::default());
        assert_eq!(otf.connection_health(), ConnectionHealth::NotEnabled);
        assert!(otf.tunnel().is_none());
    }

    #[test]
    fn test_same_route_serves_both_paths() {
        let mut canned = Canned::default();
        canned.requests.push_back(b"GET /uptime HTTP/1.1\r\n\r\n".to_vec());
        let replies = Rc::clone(&canned.replies);
        let relay = ScriptedTunnel::default();
        let endpoint = TunnelEndpoint::for_device("relay.test", 80, "/socket/v1", false, "K");
        let mut otf = Framework::with_tunnel(
            canned,
            LocalLimits::default(),
            Box::new(relay.clone()),
            TunnelOptions::new(endpoint),
        );
        uptime(&mut otf);
        assert_eq!(otf.connection_health(), ConnectionHealth::UnableToConnect);

        let t0 = Instant::now();
        otf.tick_at(t0);
        otf.tick_at(t0);
        assert_eq!(otf.connection_health(), ConnectionHealth::Connected);

        relay
            .0
            .borrow_mut()
            .inbound
            .push_back(TunnelEvent::Text(b"FWD: 0042\r\nGET /uptime HTTP/1.1\r\n\r\n".to_vec()));
        otf.tick_at(t0);

        assert_eq!(replies.borrow()[0], b"HTTP/1.1 200 OK\r\n\r\n42");
        assert_eq!(
            relay.0.borrow().outbound[0],
            b"RES: 0042\r\nHTTP/1.1 200 OK\r\n\r\n42"
        );
    }

    #[test]
    fn test_on_missing_replaces_404() {
        let mut canned = Canned::default();
        canned.requests.push_back(b"GET /nothing HTTP/1.1\r\n\r\n".to_vec());
        let replies = Rc::clone(&canned.replies);
        let mut otf = Framework::new(canned, LocalLimits::default());
        otf.on_missing(|req, res| {
            res.write_status(404, "Not found");
            write!(res, "Could not find {}", req.path());
        });

        otf.tick_at(Instant::now());
        assert_eq!(
            replies.borrow()[0],
            b"HTTP/1.1 404 Not found\r\n\r\nCould not find /nothing"
        );
    }

    #[test]
    fn test_on_matches_any_method() {
        let mut canned = Canned::default();
        canned.requests.push_back(b"DELETE /x HTTP/1.1\r\n\r\n".to_vec());
        let replies = Rc::clone(&canned.replies);
        let mut otf = Framework::new(canned, LocalLimits::default());
        otf.on("/x", |req, res| {
            res.write_default_status(200);
            write!(res, "{}", req.method());
        });

        otf.tick_at(Instant::now());
        assert_eq!(replies.borrow()[0], b"HTTP/1.1 200 OK\r\n\r\nDELETE");
    }

    #[test]
    fn test_health_handle_tracks_tunnel() {
        let relay = ScriptedTunnel::default();
        let endpoint = TunnelEndpoint::for_device("relay.test", 80, "/socket/v1", false, "K");
        let mut otf = Framework::with_tunnel(
            Canned::default(),
            LocalLimits::default(),
            Box::new(relay),
            TunnelOptions::new(endpoint),
        );
        let handle = otf.health_handle();
        let t0 = Instant::now();
        otf.tick_at(t0);
        otf.tick_at(t0);
        assert_eq!(handle.health(), ConnectionHealth::Connected);

        otf.shutdown();
        assert_eq!(handle.health(), ConnectionHealth::Disconnected);
    }
}
