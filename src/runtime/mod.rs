//! Connection runtimes.
//!
//! Two interchangeable backends drive the same sans-IO protocol code:
//! - `mio`: readiness-based event loop, one thread per worker (default)
//! - `tokio`: current-thread async runtime (see `crate::server`)
//!
//! Both share common abstractions:
//! - `Connection`: HTTP → WebSocket state machine per socket
//! - `ConnectionRegistry`: bounded slab of live connections
//! - `ErrorSink`: where connection failures and caught panics are reported

mod connection;
mod mio;
pub mod sink;

pub(crate) use connection::{Connection, ProcessResult};

use crate::config::Config;
use sink::ErrorSink;
use std::sync::Arc;

/// Run the server on the mio event loop.
pub fn run_mio(config: Config, sink: Arc<dyn ErrorSink>) -> std::io::Result<()> {
    mio::run(config, sink)
}
