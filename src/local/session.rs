//! Per-connection state machine for the local HTTP path.
//!
//! One connection is serviced at a time. Each [`LocalSession::tick`] moves the
//! machine as far as it can without waiting:
//!
//! ```text
//! Idle -> AwaitingHeaders -> AwaitingBody -> Dispatching -> Idle
//! ```
//!
//! Headers must arrive within `header_timeout` of acceptance; a declared body
//! gets its own `body_timeout` starting when the head completes. A head that
//! fills the header buffer without a blank line gets a 413. A client that goes
//! quiet past a deadline is dropped without a response.

use std::io;
use std::mem;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ConnectionSink, LocalConnection, LocalTransport};
use crate::http::{FixedBuffer, Request, Response, StreamWriter};
use crate::router::Router;

const TOO_LARGE: &[u8] = b"HTTP/1.1 413 Request too large\r\n\r\nThe request was too large";
const BUILD_FAILED: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\n\
content-type: text/plain\r\n\r\nResponse could not be built";
/// Wait between failed `listen()` attempts.
const LISTEN_RETRY: Duration = Duration::from_secs(1);

/// Why an exchange ended without a normal response.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client too slow, deadline passed")]
    Timeout,
    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
}

/// Buffer sizes and timeout budgets for the local path.
#[derive(Debug, Clone)]
pub struct LocalLimits {
    pub header_buffer_size: usize,
    pub response_buffer_size: usize,
    pub max_body_size: usize,
    pub header_timeout: Duration,
    pub body_timeout: Duration,
}

impl Default for LocalLimits {
    fn default() -> Self {
        Self {
            header_buffer_size: 1536,
            response_buffer_size: 4096,
            max_body_size: 16 * 1024,
            header_timeout: Duration::from_millis(1500),
            body_timeout: Duration::from_millis(1500),
        }
    }
}

/// Observable phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalPhase {
    Idle,
    AwaitingHeaders,
    AwaitingBody,
    Dispatching,
}

enum LocalState<C> {
    Idle,
    AwaitingHeaders {
        conn: C,
        deadline: Instant,
    },
    AwaitingBody {
        conn: C,
        deadline: Instant,
        body: FixedBuffer,
    },
    Dispatching {
        conn: C,
        body: FixedBuffer,
    },
}

/// Outcome of one state step.
enum Step<C> {
    /// Progress made; try the next state in the same tick.
    Continue(LocalState<C>),
    /// Nothing more to do this tick.
    Yield(LocalState<C>),
}

pub struct LocalSession<T: LocalTransport> {
    transport: T,
    limits: LocalLimits,
    state: LocalState<T::Connection>,
    head: FixedBuffer,
    /// Response buffer, lent to each exchange's writer and taken back after.
    output: FixedBuffer,
    listening: bool,
    listen_retry_at: Option<Instant>,
    served: u64,
}

impl<T: LocalTransport> LocalSession<T> {
    pub fn new(transport: T, limits: LocalLimits) -> Self {
        Self {
            transport,
            head: FixedBuffer::new(limits.header_buffer_size),
            output: FixedBuffer::new(limits.response_buffer_size),
            limits,
            state: LocalState::Idle,
            listening: false,
            listen_retry_at: None,
            served: 0,
        }
    }

    pub fn phase(&self) -> LocalPhase {
        match self.state {
            LocalState::Idle => LocalPhase::Idle,
            LocalState::AwaitingHeaders { .. } => LocalPhase::AwaitingHeaders,
            LocalState::AwaitingBody { .. } => LocalPhase::AwaitingBody,
            LocalState::Dispatching { .. } => LocalPhase::Dispatching,
        }
    }

    /// Number of exchanges that reached dispatch.
    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn limits(&self) -> &LocalLimits {
        &self.limits
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Advance the state machine. Never waits for the client.
    pub fn tick(&mut self, now: Instant, router: &Router) {
        if !self.ensure_listening(now) {
            return;
        }
        let mut state = mem::replace(&mut self.state, LocalState::Idle);
        loop {
            let step = match state {
                LocalState::Idle => self.accept(now),
                LocalState::AwaitingHeaders { conn, deadline } => {
                    self.read_headers(conn, deadline, now)
                }
                LocalState::AwaitingBody {
                    conn,
                    deadline,
                    body,
                } => self.read_body(conn, deadline, body, now),
                LocalState::Dispatching { conn, body } => {
                    self.dispatch(conn, &body, router);
                    Step::Yield(LocalState::Idle)
                }
            };
            match step {
                Step::Continue(next) => state = next,
                Step::Yield(next) => {
                    self.state = next;
                    return;
                }
            }
        }
    }

    fn ensure_listening(&mut self, now: Instant) -> bool {
        if self.listening {
            return true;
        }
        if self.listen_retry_at.is_some_and(|at| now < at) {
            return false;
        }
        match self.transport.listen() {
            Ok(()) => {
                info!("Local: listening");
                self.listening = true;
                self.listen_retry_at = None;
                true
            }
            Err(e) => {
                warn!(
                    "Local: listen failed: {e}, retrying in {}ms",
                    LISTEN_RETRY.as_millis()
                );
                self.listen_retry_at = Some(now + LISTEN_RETRY);
                false
            }
        }
    }

    fn accept(&mut self, now: Instant) -> Step<T::Connection> {
        match self.transport.accept() {
            Ok(Some(mut conn)) => {
                debug!(peer = ?conn.peer_addr(), "Local: accepted connection");
                conn.set_timeout(self.limits.header_timeout);
                self.head.reset();
                Step::Continue(LocalState::AwaitingHeaders {
                    conn,
                    deadline: now + self.limits.header_timeout,
                })
            }
            Ok(None) => Step::Yield(LocalState::Idle),
            Err(e) => {
                warn!("Local: accept failed: {e}");
                Step::Yield(LocalState::Idle)
            }
        }
    }

    fn read_headers(
        &mut self,
        mut conn: T::Connection,
        deadline: Instant,
        now: Instant,
    ) -> Step<T::Connection> {
        while conn.has_data() {
            if self.head.is_full() {
                break;
            }
            match conn.read_until(b'\n', self.head.spare_mut()) {
                Ok(0) => break,
                Ok(n) => {
                    if self.head.commit(n).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    abandon(&mut conn, &SessionError::Io(e));
                    return Step::Yield(LocalState::Idle);
                }
            }
            if head_complete(&self.head) {
                return self.begin_body(conn, now);
            }
        }

        if self.head.is_full() || self.head.is_overflowed() {
            let limit = self.head.capacity();
            reject_too_large(&mut conn, &SessionError::TooLarge { limit });
            return Step::Yield(LocalState::Idle);
        }
        if now >= deadline {
            abandon(&mut conn, &SessionError::Timeout);
            return Step::Yield(LocalState::Idle);
        }
        Step::Yield(LocalState::AwaitingHeaders { conn, deadline })
    }

    /// Head is complete: decide whether a body follows.
    fn begin_body(&mut self, mut conn: T::Connection, now: Instant) -> Step<T::Connection> {
        // A head that does not parse goes straight to dispatch, which answers 400.
        let declared = Request::parse_head(self.head.as_slice())
            .ok()
            .and_then(|r| r.content_length())
            .unwrap_or(0);

        if declared == 0 {
            return Step::Continue(LocalState::Dispatching {
                conn,
                body: FixedBuffer::default(),
            });
        }
        if declared > self.limits.max_body_size {
            let limit = self.limits.max_body_size;
            reject_too_large(&mut conn, &SessionError::TooLarge { limit });
            return Step::Yield(LocalState::Idle);
        }

        conn.set_timeout(self.limits.body_timeout);
        Step::Continue(LocalState::AwaitingBody {
            conn,
            deadline: now + self.limits.body_timeout,
            body: FixedBuffer::new(declared),
        })
    }

    fn read_body(
        &mut self,
        mut conn: T::Connection,
        deadline: Instant,
        mut body: FixedBuffer,
        now: Instant,
    ) -> Step<T::Connection> {
        while !body.is_full() && conn.has_data() {
            match conn.read(body.spare_mut()) {
                Ok(0) => break,
                Ok(n) => {
                    if body.commit(n).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    abandon(&mut conn, &SessionError::Io(e));
                    return Step::Yield(LocalState::Idle);
                }
            }
        }

        if body.is_full() {
            return Step::Continue(LocalState::Dispatching { conn, body });
        }
        if now >= deadline {
            abandon(&mut conn, &SessionError::Timeout);
            return Step::Yield(LocalState::Idle);
        }
        Step::Yield(LocalState::AwaitingBody {
            conn,
            deadline,
            body,
        })
    }

    fn dispatch(&mut self, mut conn: T::Connection, body: &FixedBuffer, router: &Router) {
        self.served += 1;
        let parsed = Request::parse_head(self.head.as_slice()).map(|r| r.with_body(body.as_slice()));

        let (ok, flushed, status) = {
            let mut sink = ConnectionSink::new(&mut conn);
            let mut writer = StreamWriter::with_buffer(mem::take(&mut self.output));
            writer.enable_sink(&mut sink);
            let mut response = Response::new(writer);
            router.respond(&parsed, &mut response);
            let ok = response.finish();
            let flushed = response.writer().flushed_length();
            let status = response.status();
            self.output = response.into_writer().into_buffer();
            (ok, flushed, status)
        };

        let path = parsed.as_ref().map_or("-", |r| r.path());
        if ok {
            debug!(path, status, "Local: response sent");
        } else if flushed == 0 {
            warn!(path, "Local: handler produced an invalid response, sending 500");
            if let Err(e) = conn.write(BUILD_FAILED) {
                debug!("Local: failed to send 500: {e}");
            }
        } else {
            warn!(path, flushed, "Local: response broke mid-stream, dropping connection");
        }

        release(&mut conn);
        self.head.reset();
    }
}

fn head_complete(head: &FixedBuffer) -> bool {
    head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n")
}

fn reject_too_large<C: LocalConnection>(conn: &mut C, reason: &SessionError) {
    warn!(peer = ?conn.peer_addr(), "Local: {reason}");
    if let Err(e) = conn.write(TOO_LARGE) {
        debug!("Local: failed to send 413: {e}");
    }
    release(conn);
}

fn abandon<C: LocalConnection>(conn: &mut C, reason: &SessionError) {
    debug!(peer = ?conn.peer_addr(), "Local: abandoning connection: {reason}");
    release(conn);
}

fn release<C: LocalConnection>(conn: &mut C) {
    if let Err(e) = conn.flush() {
        debug!("Local: flush on close failed: {e}");
    }
    conn.close();
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;
    use crate::http::Method;

    #[derive(Default)]
    struct Wire {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        closed: bool,
    }

    #[derive(Clone, Default)]
    struct MockConn(Rc<RefCell<Wire>>);

    impl MockConn {
        fn feed(&self, bytes: &[u8]) {
            self.0.borrow_mut().inbound.extend(bytes);
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow().outbound).into_owned()
        }

        fn closed(&self) -> bool {
            self.0.borrow().closed
        }
    }

    impl LocalConnection for MockConn {
        fn peek_byte(&mut self) -> Option<u8> {
            self.0.borrow().inbound.front().copied()
        }

        fn read_until(&mut self, terminator: u8, buf: &mut [u8]) -> io::Result<usize> {
            let mut wire = self.0.borrow_mut();
            let mut n = 0;
            while n < buf.len() {
                let Some(b) = wire.inbound.pop_front() else { break };
                buf[n] = b;
                n += 1;
                if b == terminator {
                    break;
                }
            }
            Ok(n)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut wire = self.0.borrow_mut();
            let n = buf.len().min(wire.inbound.len());
            for slot in &mut buf[..n] {
                *slot = wire.inbound.pop_front().unwrap_or_default();
            }
            Ok(n)
        }

        fn set_timeout(&mut self, _timeout: Duration) {}

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.0.borrow_mut().outbound.extend_from_slice(bytes);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed = true;
        }
    }

    #[derive(Default)]
    struct MockTransport {
        pending: VecDeque<MockConn>,
        listens: u32,
        failing_listens: u32,
    }

    impl LocalTransport for MockTransport {
        type Connection = MockConn;

        fn listen(&mut self) -> io::Result<()> {
            self.listens += 1;
            if self.failing_listens > 0 {
                self.failing_listens -= 1;
                return Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
            }
            Ok(())
        }

        fn accept(&mut self) -> io::Result<Option<MockConn>> {
            Ok(self.pending.pop_front())
        }
    }

    fn session_with(conn: &MockConn, limits: LocalLimits) -> LocalSession<MockTransport> {
        let mut transport = MockTransport::default();
        transport.pending.push_back(conn.clone());
        LocalSession::new(transport, limits)
    }

    fn uptime_router(calls: &Rc<Cell<u32>>) -> Router {
        let calls = Rc::clone(calls);
        let mut router = Router::new();
        router.register(Method::Get, "/uptime", move |_req, res| {
            calls.set(calls.get() + 1);
            res.write_status(200, "OK");
            res.write_header("content-type", "text/plain");
            res.write_body("42");
        });
        router
    }

    #[test]
    fn test_uptime_round_trip() {
        let conn = MockConn::default();
        conn.feed(b"GET /uptime HTTP/1.1\r\nhost: x\r\n\r\n");
        let calls = Rc::new(Cell::new(0));
        let router = uptime_router(&calls);
        let mut session = session_with(&conn, LocalLimits::default());

        session.tick(Instant::now(), &router);

        assert_eq!(
            conn.output(),
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\n\r\n42"
        );
        assert!(conn.closed());
        assert_eq!(calls.get(), 1);
        assert_eq!(session.phase(), LocalPhase::Idle);
        assert_eq!(session.served(), 1);
    }

    #[test]
    fn test_idle_without_connection() {
        let mut session = LocalSession::new(MockTransport::default(), LocalLimits::default());
        session.tick(Instant::now(), &Router::new());
        assert_eq!(session.phase(), LocalPhase::Idle);
        assert_eq!(session.served(), 0);
    }

    #[test]
    fn test_header_overflow_is_413_without_dispatch() {
        let conn = MockConn::default();
        conn.feed(b"GET /uptime HTTP/1.1\r\nx-long: ");
        conn.feed(&[b'a'; 200]);
        let calls = Rc::new(Cell::new(0));
        let router = uptime_router(&calls);
        let limits = LocalLimits {
            header_buffer_size: 64,
            ..LocalLimits::default()
        };
        let mut session = session_with(&conn, limits);

        session.tick(Instant::now(), &router);

        assert_eq!(
            conn.output(),
            "HTTP/1.1 413 Request too large\r\n\r\nThe request was too large"
        );
        assert!(conn.closed());
        assert_eq!(calls.get(), 0);
        assert_eq!(session.phase(), LocalPhase::Idle);
    }

    #[test]
    fn test_head_split_across_ticks() {
        let conn = MockConn::default();
        let calls = Rc::new(Cell::new(0));
        let router = uptime_router(&calls);
        let mut session = session_with(&conn, LocalLimits::default());
        let start = Instant::now();

        conn.feed(b"GET /upt");
        session.tick(start, &router);
        assert_eq!(session.phase(), LocalPhase::AwaitingHeaders);

        conn.feed(b"ime HTTP/1.1\r\n");
        session.tick(start + Duration::from_millis(10), &router);
        assert_eq!(session.phase(), LocalPhase::AwaitingHeaders);

        conn.feed(b"\r\n");
        session.tick(start + Duration::from_millis(20), &router);
        assert_eq!(session.phase(), LocalPhase::Idle);
        assert!(conn.output().ends_with("\r\n\r\n42"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_bare_newline_terminator() {
        let conn = MockConn::default();
        conn.feed(b"GET /uptime HTTP/1.1\nhost: x\n\n");
        let calls = Rc::new(Cell::new(0));
        let router = uptime_router(&calls);
        let mut session = session_with(&conn, LocalLimits::default());
        session.tick(Instant::now(), &router);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_header_timeout_is_silent() {
        let conn = MockConn::default();
        conn.feed(b"GET /uptime HTTP/1.1\r\n");
        let calls = Rc::new(Cell::new(0));
        let router = uptime_router(&calls);
        let mut session = session_with(&conn, LocalLimits::default());
        let start = Instant::now();

        session.tick(start, &router);
        assert_eq!(session.phase(), LocalPhase::AwaitingHeaders);

        session.tick(start + Duration::from_millis(1499), &router);
        assert_eq!(session.phase(), LocalPhase::AwaitingHeaders);

        session.tick(start + Duration::from_millis(1500), &router);
        assert_eq!(session.phase(), LocalPhase::Idle);
        assert!(conn.output().is_empty());
        assert!(conn.closed());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_late_data_gets_one_pass() {
        let conn = MockConn::default();
        let calls = Rc::new(Cell::new(0));
        let router = uptime_router(&calls);
        let mut session = session_with(&conn, LocalLimits::default());
        let start = Instant::now();

        conn.feed(b"GET /uptime HTTP/1.1\r\n");
        session.tick(start, &router);
        conn.feed(b"\r\n");
        session.tick(start + Duration::from_secs(5), &router);

        assert_eq!(calls.get(), 1);
        assert!(conn.output().starts_with("HTTP/1.1 200 OK"));
    }

    fn echo_router() -> Router {
        let mut router = Router::new();
        router.register(Method::Post, "/log", |req, res| {
            res.write_status(200, "OK");
            res.write_header("content-length", req.body_len());
            res.write_body_data(req.body().unwrap_or_default());
        });
        router
    }

    #[test]
    fn test_body_read_in_same_tick() {
        let conn = MockConn::default();
        conn.feed(b"POST /log HTTP/1.1\r\ncontent-length: 5\r\n\r\nhello");
        let mut session = session_with(&conn, LocalLimits::default());
        session.tick(Instant::now(), &echo_router());
        assert_eq!(
            conn.output(),
            "HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello"
        );
    }

    #[test]
    fn test_body_arrives_later() {
        let conn = MockConn::default();
        let router = echo_router();
        let mut session = session_with(&conn, LocalLimits::default());
        let start = Instant::now();

        conn.feed(b"POST /log HTTP/1.1\r\ncontent-length: 6\r\n\r\nabc");
        session.tick(start, &router);
        assert_eq!(session.phase(), LocalPhase::AwaitingBody);

        conn.feed(b"def");
        session.tick(start + Duration::from_millis(1400), &router);
        assert_eq!(session.phase(), LocalPhase::Idle);
        assert!(conn.output().ends_with("\r\n\r\nabcdef"));
    }

    #[test]
    fn test_body_timeout_abandons() {
        let conn = MockConn::default();
        let router = echo_router();
        let mut session = session_with(&conn, LocalLimits::default());
        let start = Instant::now();

        conn.feed(b"POST /log HTTP/1.1\r\ncontent-length: 10\r\n\r\nabc");
        session.tick(start, &router);
        session.tick(start + Duration::from_millis(1600), &router);

        assert_eq!(session.phase(), LocalPhase::Idle);
        assert!(conn.output().is_empty());
        assert!(conn.closed());
        assert_eq!(session.served(), 0);
    }

    #[test]
    fn test_body_deadline_starts_when_head_completes() {
        let conn = MockConn::default();
        let router = echo_router();
        let mut session = session_with(&conn, LocalLimits::default());
        let start = Instant::now();

        conn.feed(b"POST /log HTTP/1.1\r\ncontent-length: 6\r\n");
        session.tick(start, &router);
        assert_eq!(session.phase(), LocalPhase::AwaitingHeaders);

        conn.feed(b"\r\nabc");
        session.tick(start + Duration::from_millis(1400), &router);
        assert_eq!(session.phase(), LocalPhase::AwaitingBody);

        // Past the header budget, inside the body budget.
        conn.feed(b"def");
        session.tick(start + Duration::from_millis(2500), &router);
        assert_eq!(session.phase(), LocalPhase::Idle);
        assert!(conn.output().ends_with("\r\n\r\nabcdef"));
        assert_eq!(session.served(), 1);
    }

    #[test]
    fn test_body_deadline_expires_after_its_own_budget() {
        let conn = MockConn::default();
        let router = echo_router();
        let mut session = session_with(&conn, LocalLimits::default());
        let start = Instant::now();

        conn.feed(b"POST /log HTTP/1.1\r\ncontent-length: 6\r\n");
        session.tick(start, &router);
        conn.feed(b"\r\nabc");
        session.tick(start + Duration::from_millis(1400), &router);

        session.tick(start + Duration::from_millis(2800), &router);
        assert_eq!(session.phase(), LocalPhase::AwaitingBody);
        assert!(!conn.closed());

        session.tick(start + Duration::from_millis(2900), &router);
        assert_eq!(session.phase(), LocalPhase::Idle);
        assert!(conn.output().is_empty());
        assert!(conn.closed());
        assert_eq!(session.served(), 0);
    }

    #[test]
    fn test_failed_listen_backs_off() {
        let conn = MockConn::default();
        conn.feed(b"GET /uptime HTTP/1.1\r\n\r\n");
        let mut transport = MockTransport {
            failing_listens: 1,
            ..MockTransport::default()
        };
        transport.pending.push_back(conn.clone());
        let calls = Rc::new(Cell::new(0));
        let router = uptime_router(&calls);
        let mut session = LocalSession::new(transport, LocalLimits::default());
        let start = Instant::now();

        session.tick(start, &router);
        session.tick(start + Duration::from_millis(2), &router);
        session.tick(start + Duration::from_millis(999), &router);
        assert_eq!(session.transport().listens, 1);
        assert_eq!(calls.get(), 0);

        session.tick(start + Duration::from_secs(1), &router);
        assert_eq!(session.transport().listens, 2);
        assert_eq!(calls.get(), 1);

        session.tick(start + Duration::from_secs(2), &router);
        assert_eq!(session.transport().listens, 2);
    }

    #[test]
    fn test_declared_body_over_limit_is_413() {
        let conn = MockConn::default();
        conn.feed(b"POST /log HTTP/1.1\r\ncontent-length: 999999\r\n\r\n");
        let mut session = session_with(&conn, LocalLimits::default());
        session.tick(Instant::now(), &echo_router());
        assert!(conn.output().starts_with("HTTP/1.1 413 Request too large"));
        assert_eq!(session.served(), 0);
    }

    #[test]
    fn test_garbage_head_is_400() {
        let conn = MockConn::default();
        conn.feed(b"HELLO\r\n\r\n");
        let mut session = session_with(&conn, LocalLimits::default());
        session.tick(Instant::now(), &Router::new());
        assert_eq!(
            conn.output(),
            "HTTP/1.1 400 Invalid request\r\ncontent-type: text/plain\r\n\r\nCould not parse request"
        );
    }

    #[test]
    fn test_invalid_response_becomes_500() {
        let conn = MockConn::default();
        conn.feed(b"GET /broken HTTP/1.1\r\n\r\n");
        let mut router = Router::new();
        router.register(Method::Get, "/broken", |_req, res| {
            res.write_body("body before status");
        });
        let mut session = session_with(&conn, LocalLimits::default());
        session.tick(Instant::now(), &router);
        assert!(conn
            .output()
            .starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(conn.output().ends_with("Response could not be built"));
    }

    #[test]
    fn test_large_response_is_streamed() {
        let conn = MockConn::default();
        conn.feed(b"GET /big HTTP/1.1\r\n\r\n");
        let mut router = Router::new();
        router.register(Method::Get, "/big", |_req, res| {
            res.write_status(200, "OK");
            for i in 0..500 {
                writeln!(res, "line {i}");
            }
        });
        let limits = LocalLimits {
            response_buffer_size: 128,
            ..LocalLimits::default()
        };
        let mut session = session_with(&conn, limits);
        session.tick(Instant::now(), &router);

        let out = conn.output();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n\r\nline 0\n"));
        assert!(out.ends_with("line 499\n"));
        assert_eq!(out.matches("line ").count(), 500);
    }

    #[test]
    fn test_serves_connections_back_to_back() {
        let first = MockConn::default();
        let second = MockConn::default();
        first.feed(b"GET /uptime HTTP/1.1\r\n\r\n");
        second.feed(b"GET /missing HTTP/1.1\r\n\r\n");
        let mut transport = MockTransport::default();
        transport.pending.push_back(first.clone());
        transport.pending.push_back(second.clone());
        let calls = Rc::new(Cell::new(0));
        let router = uptime_router(&calls);
        let mut session = LocalSession::new(transport, LocalLimits::default());

        let now = Instant::now();
        session.tick(now, &router);
        session.tick(now, &router);

        assert!(first.output().ends_with("42"));
        assert!(second.output().starts_with("HTTP/1.1 404 Not found"));
        assert_eq!(session.served(), 2);
    }
}
