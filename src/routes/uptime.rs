//! `/uptime`.

use std::time::Instant;

use crate::http::{Request, Response};

/// Uptime in milliseconds, or microseconds when `useMicros` is present.
pub fn uptime(started: Instant, req: &Request<'_>, res: &mut Response<'_>) {
    let elapsed = started.elapsed();
    res.write_status(200, "OK");
    res.write_header("content-type", "text/plain");
    if req.query_param("useMicros").is_some() {
        write!(res, "The server has been up for {} microseconds", elapsed.as_micros());
    } else {
        write!(res, "The server has been up for {} milliseconds", elapsed.as_millis());
    }
}
