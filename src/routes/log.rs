//! `POST /log`: write the request body to the device log.

use tracing::info;

use crate::http::{Request, Response};

pub fn log_message(req: &Request<'_>, res: &mut Response<'_>) {
    match req.body() {
        Some(body) => info!(len = body.len(), "Log: {}", String::from_utf8_lossy(body)),
        None => info!("Log: (empty)"),
    }
    res.write_status(200, "OK");
    res.write_header("content-type", "text/plain");
    res.write_body("The message has been logged to the console");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_acknowledges() {
        let req = Request::parse_frame(b"POST /log HTTP/1.1\r\ncontent-length: 3\r\n\r\nhi!")
            .unwrap();
        let mut res = Response::buffered(256);
        log_message(&req, &mut res);
        assert!(res.finish());
        assert!(res
            .writer()
            .as_bytes()
            .ends_with(b"The message has been logged to the console"));
    }
}
