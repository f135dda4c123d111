//! Failure reporting.
//!
//! Connection-scoped failures and caught panics are reported here after the
//! affected connection has been closed. Reporting never stops the server.

use std::any::Any;
use std::net::SocketAddr;
use tracing::{debug, error, warn};

use crate::protocols::websocket::WsError;

/// A failed connection, as seen by the sink.
#[derive(Debug)]
pub struct ConnectionReport<'a> {
    pub conn_id: usize,
    pub peer: Option<SocketAddr>,
    pub error: &'a WsError,
}

/// Destination for failures the runtimes cannot handle locally.
pub trait ErrorSink: Send + Sync {
    /// A connection was closed because of `report.error`.
    fn connection_failed(&self, report: &ConnectionReport<'_>);

    /// A panic was caught while serving a connection.
    fn defect(&self, conn_id: usize, peer: Option<SocketAddr>, message: &str);
}

/// Sink that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn connection_failed(&self, report: &ConnectionReport<'_>) {
        let peer = report.peer.map(|p| p.to_string()).unwrap_or_default();
        match report.error {
            // Resets and timeouts are routine for long-lived sockets
            WsError::Transport(_) => debug!(
                conn_id = report.conn_id,
                peer = %peer,
                kind = report.error.kind(),
                error = %report.error,
                "Connection failed"
            ),
            _ => warn!(
                conn_id = report.conn_id,
                peer = %peer,
                kind = report.error.kind(),
                error = %report.error,
                "Connection failed"
            ),
        }
    }

    fn defect(&self, conn_id: usize, peer: Option<SocketAddr>, message: &str) {
        let peer = peer.map(|p| p.to_string()).unwrap_or_default();
        error!(conn_id, peer = %peer, panic = message, "Connection handler panicked");
    }
}

/// Log panics through `tracing` before unwinding.
///
/// Panics on connection paths are additionally caught and reported by the
/// runtimes; this hook covers everything else.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let thread = std::thread::current();
        error!(
            thread = thread.name().unwrap_or("<unnamed>"),
            location = %location,
            panic = %panic_message(info.payload()),
            "Something bad happened"
        );
    }));
}

/// Extract the message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Sink that records reports for inspection in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub failures: std::sync::Mutex<Vec<(usize, &'static str)>>,
    pub defects: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl ErrorSink for RecordingSink {
    fn connection_failed(&self, report: &ConnectionReport<'_>) {
        self.failures
            .lock()
            .unwrap()
            .push((report.conn_id, report.error.kind()));
    }

    fn defect(&self, _conn_id: usize, _peer: Option<SocketAddr>, message: &str) {
        self.defects.lock().unwrap().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");

        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "code 7");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u32)).unwrap_err();
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::default();
        let err = WsError::Protocol("bad");
        sink.connection_failed(&ConnectionReport {
            conn_id: 3,
            peer: None,
            error: &err,
        });
        sink.defect(4, None, "oops");

        assert_eq!(*sink.failures.lock().unwrap(), vec![(3, "protocol")]);
        assert_eq!(*sink.defects.lock().unwrap(), vec!["oops".to_string()]);
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        let err = WsError::Handshake("missing Sec-WebSocket-Key");
        TracingSink.connection_failed(&ConnectionReport {
            conn_id: 1,
            peer: Some("127.0.0.1:9".parse().unwrap()),
            error: &err,
        });
        TracingSink.defect(1, None, "boom");
    }
}
