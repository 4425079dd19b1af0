//! Demo device routes wired by the `otf` binary.
//!
//! | Method | Path      | Description                               |
//! |--------|-----------|-------------------------------------------|
//! | any    | `/uptime` | Process uptime, `?useMicros` for µs       |
//! | POST   | `/log`    | Log the request body                      |
//! | GET    | `/health` | Tunnel health as JSON                     |
//! | -      | missing   | Plain-text 404                            |

pub mod health;
pub mod log;
pub mod uptime;

use std::time::Instant;

use crate::framework::Framework;
use crate::http::{Method, Request, Response};
use crate::local::LocalTransport;

/// Register every demo route on `otf`. Uptime counts from `started`.
pub fn install<L: LocalTransport>(otf: &mut Framework<L>, started: Instant) {
    otf.on("/uptime", move |req, res| uptime::uptime(started, req, res));
    otf.on_method(Method::Post, "/log", self::log::log_message);
    let health = otf.health_handle();
    otf.on_method(Method::Get, "/health", move |req, res| {
        health::health(&health, req, res);
    });
    otf.on_missing(missing_page);
}

fn missing_page(_req: &Request<'_>, res: &mut Response<'_>) {
    res.write_status(404, "Not found");
    res.write_header("content-type", "text/plain");
    res.write_body("That page does not exist.");
}
