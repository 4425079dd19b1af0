//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `OTF_LISTEN`, `OTF_DEVICE_KEY`
//! 2. **Config file**: path via `--config <path>`, or `otf.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! header_buffer_size = 1536
//! response_buffer_size = 4096
//! max_body_size = 16384
//! header_timeout_ms = 1500
//! body_timeout_ms = 1500
//! tick_interval_ms = 2
//!
//! [device]
//! key = "0123456789ABCDEF"
//!
//! [logging]
//! level = "info"
//!
//! # Optional: omit entirely to disable the tunnel
//! [tunnel]
//! host = "relay.example.com"
//! port = 443
//! path = "/socket/v1"          # ?deviceKey=<key> is appended
//! secure = true
//! reconnect_first_ms = 1000    # first retry after a connected link drops
//! reconnect_interval_ms = 30000
//! connect_timeout_ms = 5000
//! heartbeat_interval_ms = 15000
//! heartbeat_timeout_ms = 5000
//! heartbeat_max_missed = 1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::local::session::LocalLimits;
use crate::tunnel::session::{HeartbeatPolicy, TunnelOptions};
use crate::tunnel::TunnelEndpoint;

const DEFAULT_PATH: &str = "otf.toml";
/// Smallest response buffer that holds a `RES:` preamble plus a status line.
pub const MIN_RESPONSE_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Optional relay tunnel. Absent means local-only.
    pub tunnel: Option<TunnelConfig>,
}

/// Local listener, buffer sizes and timeout budgets.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Request line plus headers must fit here (default 1536).
    #[serde(default = "default_header_buffer_size")]
    pub header_buffer_size: usize,
    /// Streaming writer capacity, shared by both paths (default 4096, at least 64).
    #[serde(default = "default_response_buffer_size")]
    pub response_buffer_size: usize,
    /// A declared `content-length` above this gets a 413 (default 16 KiB).
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default = "default_header_timeout_ms")]
    pub header_timeout_ms: u64,
    #[serde(default = "default_body_timeout_ms")]
    pub body_timeout_ms: u64,
    /// Sleep between scheduler ticks (default 2).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// Device identity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    /// Key the relay knows this device by. Override with `OTF_DEVICE_KEY`.
    #[serde(default)]
    pub key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Relay tunnel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    pub host: String,
    #[serde(default = "default_tunnel_port")]
    pub port: u16,
    #[serde(default = "default_tunnel_path")]
    pub path: String,
    /// Use `wss://` (default true).
    #[serde(default = "default_secure")]
    pub secure: bool,
    #[serde(default = "default_reconnect_first_ms")]
    pub reconnect_first_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Missed heartbeats that force a reconnect (default 1).
    #[serde(default = "default_heartbeat_max_missed")]
    pub heartbeat_max_missed: u32,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_header_buffer_size() -> usize {
    1536
}
fn default_response_buffer_size() -> usize {
    4096
}
fn default_max_body_size() -> usize {
    16 * 1024
}
fn default_header_timeout_ms() -> u64 {
    1500
}
fn default_body_timeout_ms() -> u64 {
    1500
}
fn default_tick_interval_ms() -> u64 {
    2
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_tunnel_port() -> u16 {
    443
}
fn default_tunnel_path() -> String {
    "/socket/v1".to_string()
}
fn default_secure() -> bool {
    true
}
fn default_reconnect_first_ms() -> u64 {
    1000
}
fn default_reconnect_interval_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_heartbeat_interval_ms() -> u64 {
    15_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    5000
}
fn default_heartbeat_max_missed() -> u32 {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            header_buffer_size: default_header_buffer_size(),
            response_buffer_size: default_response_buffer_size(),
            max_body_size: default_max_body_size(),
            header_timeout_ms: default_header_timeout_ms(),
            body_timeout_ms: default_body_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn limits(&self) -> LocalLimits {
        LocalLimits {
            header_buffer_size: self.header_buffer_size,
            response_buffer_size: self.response_buffer_size,
            max_body_size: self.max_body_size,
            header_timeout: Duration::from_millis(self.header_timeout_ms),
            body_timeout: Duration::from_millis(self.body_timeout_ms),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl TunnelConfig {
    /// Session options for `device_key`, writing responses through a buffer
    /// of `response_buffer_size` bytes.
    pub fn options(&self, device_key: &str, response_buffer_size: usize) -> TunnelOptions {
        let endpoint =
            TunnelEndpoint::for_device(&self.host, self.port, &self.path, self.secure, device_key);
        TunnelOptions {
            endpoint,
            reconnect_first: Duration::from_millis(self.reconnect_first_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            heartbeat: HeartbeatPolicy {
                interval: Duration::from_millis(self.heartbeat_interval_ms),
                timeout: Duration::from_millis(self.heartbeat_timeout_ms),
                max_missed: self.heartbeat_max_missed,
            },
            response_buffer_size,
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `otf.toml` in the
    /// current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_PATH).exists() => Self::from_file(DEFAULT_PATH)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_string(),
                source,
            },
            other => other,
        })
    }

    /// Parse TOML text. Missing sections and fields take their defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })
    }

    /// Apply `OTF_*` overrides looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = var("OTF_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(key) = var("OTF_DEVICE_KEY") {
            self.device.key = key;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.header_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "header_buffer_size must be greater than zero".into(),
            ));
        }
        if server.response_buffer_size < MIN_RESPONSE_BUFFER {
            return Err(ConfigError::Invalid(format!(
                "response_buffer_size must be at least {MIN_RESPONSE_BUFFER} bytes"
            )));
        }
        if let Some(tunnel) = &self.tunnel {
            if self.device.key.is_empty() {
                return Err(ConfigError::Invalid(
                    "[device] key is required when [tunnel] is enabled".into(),
                ));
            }
            if tunnel.host.is_empty() {
                return Err(ConfigError::Invalid("[tunnel] host is empty".into()));
            }
            if tunnel.heartbeat_timeout_ms >= tunnel.heartbeat_interval_ms {
                return Err(ConfigError::Invalid(
                    "heartbeat_timeout_ms must be shorter than heartbeat_interval_ms".into(),
                ));
            }
            if tunnel.heartbeat_max_missed == 0 {
                return Err(ConfigError::Invalid(
                    "heartbeat_max_missed must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}
