//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! Each worker is a single thread with its own poll instance and
//! `SO_REUSEPORT` listener; connections never move between workers.

mod event_loop;

use crate::config::Config;
use crate::runtime::sink::ErrorSink;
use std::sync::Arc;

/// Run the server using mio backend.
pub fn run(config: Config, sink: Arc<dyn ErrorSink>) -> std::io::Result<()> {
    event_loop::run(config, sink)
}
