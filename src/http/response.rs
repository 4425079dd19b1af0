//! Structured HTTP response writer.
//!
//! [`Response`] sits on top of a [`StreamWriter`] and enforces the order
//! status → headers → body. Writing out of order, or writing the status twice,
//! marks the response invalid for good; every later write is ignored and the
//! session answers with a 500 instead (when nothing has reached the peer yet).
//!
//! Headers may repeat; each call emits its own `name: value` line. The first
//! body write emits the blank line that ends the head.

use std::fmt;

use super::writer::StreamWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Created,
    StatusWritten,
    HeadersWritten,
    BodyWritten,
}

/// Response under construction, written straight into its writer.
pub struct Response<'s> {
    writer: StreamWriter<'s>,
    stage: Stage,
    valid: bool,
    status: Option<u16>,
}

impl<'s> Response<'s> {
    /// Wrap a writer. Anything already in it (a tunnel preamble, say) is kept
    /// in front of the status line.
    pub fn new(writer: StreamWriter<'s>) -> Self {
        Self {
            writer,
            stage: Stage::Created,
            valid: true,
            status: None,
        }
    }

    /// A response that must fit entirely in `capacity` bytes.
    pub fn buffered(capacity: usize) -> Self {
        Self::new(StreamWriter::new(capacity))
    }

    /// Write `HTTP/1.1 <code> <message>`. Must be the first write.
    pub fn write_status(&mut self, code: u16, message: &str) {
        if !self.advance(Stage::Created, Stage::StatusWritten) {
            return;
        }
        self.status = Some(code);
        self.writer
            .write_formatted(format_args!("HTTP/1.1 {code} {message}\r\n"));
    }

    /// Write the status line with the standard reason phrase for `code`.
    pub fn write_default_status(&mut self, code: u16) {
        self.write_status(code, default_reason(code));
    }

    /// Add a header line. Allowed after the status and before any body.
    pub fn write_header(&mut self, name: &str, value: impl fmt::Display) {
        if !self.valid {
            return;
        }
        if self.stage < Stage::StatusWritten || self.stage > Stage::HeadersWritten {
            self.valid = false;
            return;
        }
        self.stage = Stage::HeadersWritten;
        self.writer
            .write_formatted(format_args!("{name}: {value}\r\n"));
    }

    /// Append a formatted body chunk. Also reachable through `write!(res, ..)`.
    pub fn write_body_chunk(&mut self, args: fmt::Arguments<'_>) {
        if self.begin_body() {
            self.writer.write_formatted(args);
        }
    }

    /// Append a text body chunk.
    pub fn write_body(&mut self, text: &str) {
        self.write_body_data(text.as_bytes());
    }

    /// Append raw body bytes; binary safe.
    pub fn write_body_data(&mut self, data: &[u8]) {
        if self.begin_body() {
            self.writer.write_raw(data);
        }
    }

    /// Lets handlers use `write!(res, "...")` for body chunks.
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) {
        self.write_body_chunk(args);
    }

    /// Terminate the head if no body was written and end the stream.
    ///
    /// Returns whether the response was produced correctly. A response whose
    /// handler never wrote a status is invalid.
    pub fn finish(&mut self) -> bool {
        match self.stage {
            Stage::Created => self.valid = false,
            Stage::StatusWritten | Stage::HeadersWritten if self.valid => {
                self.writer.write_raw(b"\r\n");
                self.stage = Stage::BodyWritten;
            }
            _ => {}
        }
        if !self.valid {
            return false;
        }
        self.writer.end()
    }

    pub fn is_valid(&self) -> bool {
        self.valid && self.writer.is_valid()
    }

    /// Status code written by the handler, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn writer(&self) -> &StreamWriter<'s> {
        &self.writer
    }

    pub fn into_writer(self) -> StreamWriter<'s> {
        self.writer
    }

    /// Bytes produced so far, including anything already flushed.
    pub fn total_length(&self) -> usize {
        self.writer.total_length()
    }

    fn advance(&mut self, from: Stage, to: Stage) -> bool {
        if !self.valid {
            return false;
        }
        if self.stage != from {
            self.valid = false;
            return false;
        }
        self.stage = to;
        true
    }

    fn begin_body(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        match self.stage {
            Stage::Created => {
                self.valid = false;
                false
            }
            Stage::StatusWritten | Stage::HeadersWritten => {
                self.writer.write_raw(b"\r\n");
                self.stage = Stage::BodyWritten;
                true
            }
            Stage::BodyWritten => true,
        }
    }
}

impl fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("stage", &self.stage)
            .field("valid", &self.valid)
            .field("status", &self.status)
            .field("writer", &self.writer)
            .finish()
    }
}

/// Canonical reason phrase, `"No message"` for unregistered codes.
pub fn default_reason(code: u16) -> &'static str {
    hyper::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("No message")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_response() {
        let mut res = Response::buffered(256);
        res.write_status(200, "OK");
        res.write_header("content-type", "text/plain");
        res.write_header("content-length", 2);
        res.write_body("42");
        assert!(res.finish());
        assert_eq!(
            res.writer().as_bytes(),
            b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 2\r\n\r\n42"
        );
        assert_eq!(res.status(), Some(200));
    }

    #[test]
    fn test_repeated_headers_not_merged() {
        let mut res = Response::buffered(256);
        res.write_default_status(204);
        res.write_header("set-cookie", "a=1");
        res.write_header("set-cookie", "b=2");
        assert!(res.finish());
        assert_eq!(
            res.writer().as_bytes(),
            b"HTTP/1.1 204 No Content\r\nset-cookie: a=1\r\nset-cookie: b=2\r\n\r\n"
        );
    }

    #[test]
    fn test_body_before_status_is_invalid() {
        let mut res = Response::buffered(256);
        res.write_body("oops");
        assert!(!res.is_valid());
        // Nothing later can rescue it.
        res.write_status(200, "OK");
        res.write_header("a", "b");
        res.write_body("x");
        assert!(!res.is_valid());
        assert!(!res.finish());
        assert!(res.writer().as_bytes().is_empty());
    }

    #[test]
    fn test_header_before_status_is_invalid() {
        let mut res = Response::buffered(64);
        res.write_header("a", "b");
        assert!(!res.is_valid());
    }

    #[test]
    fn test_double_status_is_invalid() {
        let mut res = Response::buffered(64);
        res.write_status(200, "OK");
        res.write_status(500, "Nope");
        assert!(!res.is_valid());
    }

    #[test]
    fn test_header_after_body_is_invalid() {
        let mut res = Response::buffered(64);
        res.write_status(200, "OK");
        res.write_body("x");
        res.write_header("late", 1);
        assert!(!res.is_valid());
    }

    #[test]
    fn test_write_macro_chunks() {
        let mut res = Response::buffered(128);
        res.write_status(200, "OK");
        write!(res, "up {} ", 12);
        write!(res, "{}", "ms");
        assert!(res.finish());
        assert!(res.writer().as_bytes().ends_with(b"\r\n\r\nup 12 ms"));
    }

    #[test]
    fn test_binary_body() {
        let mut res = Response::buffered(64);
        res.write_status(200, "OK");
        res.write_body_data(&[0, 159, 146, 150]);
        assert!(res.finish());
        assert!(res.writer().as_bytes().ends_with(&[b'\n', 0, 159, 146, 150]));
    }

    #[test]
    fn test_finish_without_status_is_invalid() {
        let mut res = Response::buffered(64);
        assert!(!res.finish());
    }

    #[test]
    fn test_overflow_invalidates_response() {
        let mut res = Response::buffered(24);
        res.write_status(200, "OK");
        res.write_body("this body does not fit in the buffer");
        assert!(!res.is_valid());
    }

    #[test]
    fn test_streamed_response_through_sink() {
        let mut out: Vec<u8> = Vec::new();
        {
            let mut writer = StreamWriter::new(32);
            writer.enable_sink(&mut out);
            let mut res = Response::new(writer);
            res.write_status(200, "OK");
            for _ in 0..10 {
                res.write_body("0123456789");
            }
            assert!(res.finish());
            assert!(res.writer().peak_len() <= 32);
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n\r\n0123456789"));
        assert_eq!(text.len(), "HTTP/1.1 200 OK\r\n\r\n".len() + 100);
    }

    #[test]
    fn test_default_reason() {
        assert_eq!(default_reason(404), "Not Found");
        assert_eq!(default_reason(799), "No message");
    }
}
