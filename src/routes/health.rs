//! `GET /health`: tunnel connection health as JSON.
//!
//! ```json
//! {"health":"CONNECTED","since_change_ms":5120,"reconnects":0,
//!  "forwarded_requests":12,"missed_heartbeats":0}
//! ```

use std::time::Instant;

use tracing::warn;

use crate::http::{Request, Response};
use crate::state::HealthHandle;

pub fn health(handle: &HealthHandle, _req: &Request<'_>, res: &mut Response<'_>) {
    let snapshot = handle.snapshot(Instant::now());
    let body = match serde_json::to_string(&snapshot) {
        Ok(body) => body,
        Err(e) => {
            warn!("Health: failed to serialize snapshot: {e}");
            res.write_default_status(500);
            return;
        }
    };
    res.write_status(200, "OK");
    res.write_header("content-type", "application/json");
    res.write_header("content-length", body.len());
    res.write_body(&body);
}
