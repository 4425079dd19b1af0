#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! otf, a small HTTP engine for memory-constrained devices.
//!
//! One route table is served two ways: directly over a local TCP listener,
//! and through an outbound tunnel to a relay that forwards internet requests
//! as `FWD:` frames. Everything runs cooperatively from a single scheduler
//! tick with fixed-size buffers.
//!
//! - `http`: bounded buffer, streaming writer, request parser, response builder
//! - `router`: exact `(method, path)` route table
//! - `local`: local transport interface, session state machine, std TCP adapter
//! - `tunnel`: tunnel transport interface, framing, session, WebSocket adapter
//! - `state`: shared connection health
//! - `framework`: the facade embedding code drives
//! - `config`: TOML + env-var configuration
//! - `routes`: demo device routes

pub mod config;
pub mod framework;
pub mod http;
pub mod local;
pub mod router;
pub mod routes;
pub mod state;
pub mod tunnel;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use framework::Framework;
pub use http::{Method, Request, Response};
pub use router::Router;
pub use state::{ConnectionHealth, HealthHandle};
