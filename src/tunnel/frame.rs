//! `FWD:`/`RES:` framing.
//!
//! ```text
//! FWD: <id>\r\n<raw HTTP request>
//! RES: <id>\r\n<raw HTTP response>
//! ```
//!
//! The correlation id is exactly [`ID_LEN`] printable ASCII characters.

use std::fmt;

use thiserror::Error;

pub const FORWARD_PREFIX: &[u8] = b"FWD: ";
pub const RESPONSE_PREFIX: &str = "RES: ";
pub const ID_LEN: usize = 4;

/// Bytes before the HTTP payload: prefix, id, CRLF.
pub const HEADER_LEN: usize = FORWARD_PREFIX.len() + ID_LEN + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("not a forwarded request")]
    NotForwarded,
    #[error("frame shorter than the FWD header")]
    TooShort,
    #[error("correlation id not followed by CRLF")]
    MissingTerminator,
    #[error("correlation id contains non-printable bytes")]
    InvalidId,
}

/// Correlation id, echoed verbatim on the response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId([u8; ID_LEN]);

impl RequestId {
    pub fn as_str(&self) -> &str {
        // Validated as ASCII on construction.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded `FWD:` frame borrowing from the received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedRequest<'a> {
    pub id: RequestId,
    pub payload: &'a [u8],
}

/// Whether a message is meant for the request path at all.
pub fn is_forward(message: &[u8]) -> bool {
    message.starts_with(FORWARD_PREFIX)
}

/// Split a `FWD:` message into its id and HTTP payload.
pub fn decode_forward(message: &[u8]) -> Result<ForwardedRequest<'_>, FrameError> {
    if !is_forward(message) {
        return Err(FrameError::NotForwarded);
    }
    if message.len() < HEADER_LEN {
        return Err(FrameError::TooShort);
    }
    let id_end = FORWARD_PREFIX.len() + ID_LEN;
    if &message[id_end..HEADER_LEN] != b"\r\n" {
        return Err(FrameError::MissingTerminator);
    }
    let raw_id = &message[FORWARD_PREFIX.len()..id_end];
    if !raw_id.iter().all(u8::is_ascii_graphic) {
        return Err(FrameError::InvalidId);
    }
    let mut id = [0u8; ID_LEN];
    id.copy_from_slice(raw_id);
    Ok(ForwardedRequest {
        id: RequestId(id),
        payload: &message[HEADER_LEN..],
    })
}

/// The `RES: <id>\r\n` line that opens a response frame.
pub struct ResponsePreamble(pub RequestId);

impl fmt::Display for ResponsePreamble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{RESPONSE_PREFIX}{}\r\n", self.0)
    }
}

/// Whole-message fallback when a handler's response could not be built.
pub fn internal_error_frame(id: RequestId) -> String {
    format!(
        "{}HTTP/1.1 500 Internal Error\r\n\r\nAn internal error occurred",
        ResponsePreamble(id)
    )
}
