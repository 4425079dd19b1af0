//! HTTP/1.1 request parsing.
//!
//! [`Request`] is a borrowed view: the path, query parameters, header values
//! and body all point into the caller's bytes, which must outlive it. Only
//! header names that arrive with upper-case letters are copied (lower-cased).
//!
//! Two entry points cover the two transports:
//!
//! - [`Request::parse_head`]: the local session has already located the blank
//!   line and reads the body separately, attaching it with [`Request::with_body`].
//! - [`Request::parse_frame`]: a tunnel frame carries head and body together;
//!   everything after the blank line is the body.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// HTTP method. [`Method::Any`] only exists for route registration and is
/// never produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Any,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Parse a request-line method token. Case-sensitive, as on the wire.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request could not be parsed. Every variant is answered with 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("unknown HTTP method")]
    UnknownMethod,
    #[error("missing or malformed HTTP version")]
    MissingVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("request head not terminated by a blank line")]
    Unterminated,
    #[error("request head is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// Bytes end at the blank line; the body arrives separately.
    Head,
    /// Bytes after the blank line are the body.
    Frame,
}

/// A parsed request borrowing from the bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    method: Method,
    path: &'a str,
    version: &'a str,
    query: HashMap<&'a str, &'a str>,
    headers: HashMap<Cow<'a, str>, &'a str>,
    body: Option<&'a [u8]>,
}

impl<'a> Request<'a> {
    /// Parse a request line plus headers ending in a blank line.
    pub fn parse_head(head: &'a [u8]) -> Result<Self, ParseError> {
        Self::parse(head, Framing::Head)
    }

    /// Parse a complete pre-delimited request: head, blank line, then body.
    pub fn parse_frame(frame: &'a [u8]) -> Result<Self, ParseError> {
        Self::parse(frame, Framing::Frame)
    }

    /// Attach a body read separately from the head.
    #[must_use]
    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    fn parse(bytes: &'a [u8], framing: Framing) -> Result<Self, ParseError> {
        let mut lines = Lines::new(bytes);

        let request_line = lines.next().ok_or(ParseError::Unterminated)?;
        let request_line = to_str(request_line)?;
        let (method, target, version) = split_request_line(request_line)?;
        let (path, query) = split_target(target)?;

        let mut headers = HashMap::new();
        loop {
            let line = lines.next().ok_or(ParseError::Unterminated)?;
            if line.is_empty() {
                break;
            }
            let (name, value) = split_header(to_str(line)?)?;
            headers.insert(name, value);
        }

        let mut request = Self {
            method,
            path,
            version,
            query,
            headers,
            body: None,
        };

        if framing == Framing::Frame {
            let mut body = &bytes[lines.offset()..];
            if let Some(declared) = request.content_length() {
                body = &body[..declared.min(body.len())];
            }
            request = request.with_body(body);
        }

        Ok(request)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Path without query string or fragment.
    pub fn path(&self) -> &'a str {
        self.path
    }

    pub fn version(&self) -> &'a str {
        self.version
    }

    /// Value of a query parameter, `""` for a bare `?flag`.
    pub fn query_param(&self, name: &str) -> Option<&'a str> {
        self.query.get(name).copied()
    }

    pub fn query_params(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.query.iter().map(|(k, v)| (*k, *v))
    }

    /// Header value by name. The lookup is case-insensitive.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            return self.headers.get(name.to_ascii_lowercase().as_str()).copied();
        }
        self.headers.get(name).copied()
    }

    /// All headers as `(lower-cased name, value)`.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &'a str)> + '_ {
        self.headers.iter().map(|(k, v)| (k.as_ref(), *v))
    }

    /// Declared body length. Unparseable values count as absent.
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
    }

    /// Raw body bytes. May contain NULs and need not be UTF-8.
    pub fn body(&self) -> Option<&'a [u8]> {
        self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.map_or(0, <[u8]>::len)
    }

    /// Body as text, if present and valid UTF-8.
    pub fn body_str(&self) -> Option<&'a str> {
        self.body.and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Iterates `\n`-terminated lines, stripping a trailing `\r`. A final line
/// without `\n` is not yielded.
struct Lines<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Offset of the first byte not yet consumed.
    fn offset(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = &self.bytes[self.pos..];
        let nl = rest.iter().position(|&b| b == b'\n')?;
        self.pos += nl + 1;
        let line = &rest[..nl];
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}

fn to_str(bytes: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)
}

fn split_request_line(line: &str) -> Result<(Method, &str, &str), ParseError> {
    let mut parts = line.split(' ');
    let method = parts.next().filter(|m| !m.is_empty());
    let target = parts.next().filter(|t| !t.is_empty());
    let version = parts.next();
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequestLine);
    }

    let method = method.ok_or(ParseError::InvalidRequestLine)?;
    let method = Method::from_token(method).ok_or(ParseError::UnknownMethod)?;
    let target = target.ok_or(ParseError::InvalidRequestLine)?;
    let version = version
        .filter(|v| v.starts_with("HTTP/") && v.len() > 5)
        .ok_or(ParseError::MissingVersion)?;

    Ok((method, target, version))
}

/// Split a request target into path and query parameters. A `#` ends the
/// query (or the path, when there is no query) and the fragment is dropped.
fn split_target(target: &str) -> Result<(&str, HashMap<&str, &str>), ParseError> {
    let mut query = HashMap::new();
    let (path, query_str) = match target.find(['?', '#']) {
        Some(i) if target.as_bytes()[i] == b'?' => {
            let after = &target[i + 1..];
            let end = after.find('#').unwrap_or(after.len());
            (&target[..i], &after[..end])
        }
        Some(i) => (&target[..i], ""),
        None => (target, ""),
    };
    if path.is_empty() {
        return Err(ParseError::InvalidRequestLine);
    }

    for pair in query_str.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if !key.is_empty() {
            query.insert(key, value);
        }
    }

    Ok((path, query))
}

fn split_header(line: &str) -> Result<(Cow<'_, str>, &str), ParseError> {
    let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
    if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(ParseError::InvalidHeader);
    }
    let name = if name.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(name.to_ascii_lowercase())
    } else {
        Cow::Borrowed(name)
    };
    Ok((name, value.trim_matches([' ', '\t'])))
}
