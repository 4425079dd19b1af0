#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # otf
//!
//! Device HTTP server reachable on the local network and through a relay.
//!
//! ## Subcommands
//!
//! - `otf serve` (default): run the local listener and, when `[tunnel]` is
//!   configured, the relay tunnel
//!
//! ## Threads
//!
//! ```text
//! tokio runtime    : signal handling, WebSocket socket task
//! blocking thread  : the cooperative tick loop: local session + tunnel session
//! ```
//!
//! The engine itself is single-threaded. The tick loop owns the framework,
//! and the WebSocket adapter reaches the runtime through channels only.

use std::time::Instant;

use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use otf::config::Config;
use otf::framework::Framework;
use otf::local::tcp::TcpTransport;
use otf::routes;
use otf::tunnel::ws::WsTransport;

/// Device HTTP server with a relay tunnel.
#[derive(Parser)]
#[command(name = "otf", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to TOML config file (when no subcommand is given).
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Serve) | None => run_server(cli.config.as_deref()).await,
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("otf: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("otf v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let runtime = Handle::current();
    let tick_loop =
        tokio::task::spawn_blocking(move || run_tick_loop(&config, runtime, &loop_cancel));

    shutdown_signal().await;
    cancel.cancel();

    info!("Shutting down...");
    if let Err(e) = tick_loop.await {
        warn!("Tick loop ended abnormally: {e}");
    }
    info!("Shutdown complete");
}

/// Build the framework on this thread and tick it until cancelled.
fn run_tick_loop(config: &Config, runtime: Handle, cancel: &CancellationToken) {
    let started = Instant::now();
    let local = TcpTransport::new(config.server.listen.clone());
    let limits = config.server.limits();

    let mut otf = if let Some(tunnel) = &config.tunnel {
        info!("Tunnel: relay at {}:{}", tunnel.host, tunnel.port);
        let options = tunnel.options(&config.device.key, config.server.response_buffer_size);
        Framework::with_tunnel(local, limits, Box::new(WsTransport::new(runtime)), options)
    } else {
        info!("Tunnel: not configured, serving locally only");
        Framework::new(local, limits)
    };
    routes::install(&mut otf, started);

    let interval = config.server.tick_interval();
    while !cancel.is_cancelled() {
        otf.tick();
        std::thread::sleep(interval);
    }
    otf.shutdown();
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
