//! rawsocket-ws: a WebSocket echo server on raw TCP sockets
//!
//! The WebSocket protocol is implemented directly on top of the HTTP
//! upgrade socket:
//! - RFC 6455 handshake (`Sec-WebSocket-Accept` derivation)
//! - Masked client text frames with 7, 16 and 64-bit length forms
//! - Unmasked server text frames
//!
//! Every text message is parsed as JSON and answered with
//! `{"message": <message>, "at": <ISO-8601 timestamp>}`.
//!
//! Plain HTTP requests are answered with a fixed greeting.

mod clock;
mod config;
mod protocols;
mod runtime;
mod server;

use config::{Config, RuntimeType};
use runtime::sink::{install_panic_hook, ErrorSink, TracingSink};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    install_panic_hook();

    info!(
        listen = %config.listen,
        runtime = ?config.runtime,
        workers = config.workers,
        max_connections = config.max_connections,
        max_frame_size = config.max_frame_size,
        idle_timeout_secs = config.idle_timeout.map(|d| d.as_secs()).unwrap_or(0),
        "Starting rawsocket-ws server"
    );

    let sink: Arc<dyn ErrorSink> = Arc::new(TracingSink);

    match config.runtime {
        RuntimeType::Mio => run_mio(config, sink),
        RuntimeType::Tokio => server::run(config, sink),
    }
}

/// Run with mio runtime (epoll on Linux, kqueue on macOS)
fn run_mio(config: Config, sink: Arc<dyn ErrorSink>) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using mio runtime (epoll/kqueue)");
    runtime::run_mio(config, sink)?;
    Ok(())
}
