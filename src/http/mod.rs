//! Bounded HTTP/1.1 building blocks shared by the local and tunnel paths.
//!
//! - `buffer`: fixed-capacity byte buffer
//! - `writer`: streaming output writer and the sink trait
//! - `request`: request parsing into a borrowed view
//! - `response`: ordered response writer on top of `writer`

pub mod buffer;
pub mod request;
pub mod response;
pub mod writer;

pub use buffer::{FixedBuffer, Overflow};
pub use request::{Method, ParseError, Request};
pub use response::Response;
pub use writer::{ResponseSink, SinkError, StreamWriter};
