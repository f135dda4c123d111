//! Connection state machine shared by both runtimes.
//!
//! A connection starts in the HTTP phase. A plain request is answered and
//! the connection closes; an upgrade request hands over to a
//! `ConnectionSession` for the rest of the connection's life.

use bytes::{Buf, BytesMut};
use slab::Slab;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::protocols::http::{self, parser::response_bad_request, parser::response_greeting};
use crate::protocols::websocket::{ConnectionSession, Progress, SessionState, WsError};

/// Current phase of a connection.
#[derive(Debug)]
pub enum Phase<C> {
    /// Waiting for the HTTP request head.
    Http,
    /// Upgraded; frames are handled by the session.
    WebSocket(ConnectionSession<C>),
    /// Final response queued; nothing more will be read.
    Closing,
}

/// Result of processing inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Need more data, nothing to send.
    NeedData,
    /// Output was produced; keep the connection open.
    Response,
    /// Flush any output, then close the connection.
    Close,
}

/// Protocol state for a single client connection.
#[derive(Debug)]
pub struct Connection<C = SystemClock> {
    phase: Phase<C>,
    max_frame_size: usize,
    clock: C,
}

impl<C: Clock + Clone> Connection<C> {
    /// Create a new connection waiting for its HTTP request.
    pub fn new(max_frame_size: usize, clock: C) -> Self {
        Self {
            phase: Phase::Http,
            max_frame_size,
            clock,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> &Phase<C> {
        &self.phase
    }

    /// Consume what can be consumed from `inbound`, appending responses to `out`.
    ///
    /// On error the connection moves to `Closing`; `out` may still hold a
    /// final response that should be flushed before the socket is closed.
    pub fn process(&mut self, inbound: &mut BytesMut, out: &mut BytesMut) -> Result<ProcessResult, WsError> {
        let written = out.len();

        let result = if matches!(self.phase, Phase::Http) {
            self.process_request(inbound, out)
        } else if let Phase::WebSocket(session) = &mut self.phase {
            match session.on_readable(inbound, out) {
                Ok(Progress::Open) => Ok(ProcessResult::NeedData),
                Ok(Progress::Closed) => {
                    debug!("Close frame received");
                    Ok(ProcessResult::Close)
                }
                Err(e) => Err(e),
            }
        } else {
            Ok(ProcessResult::Close)
        };

        match result {
            Ok(ProcessResult::Close) | Err(_) => self.phase = Phase::Closing,
            Ok(_) => {}
        }

        match result {
            Ok(ProcessResult::NeedData) if out.len() > written => Ok(ProcessResult::Response),
            other => other,
        }
    }

    fn process_request(&mut self, inbound: &mut BytesMut, out: &mut BytesMut) -> Result<ProcessResult, WsError> {
        let request = match http::parse(&inbound[..]) {
            http::ParseResult::Complete(request, consumed) => {
                inbound.advance(consumed);
                request
            }
            http::ParseResult::Incomplete => return Ok(ProcessResult::NeedData),
            http::ParseResult::Error(e) => {
                out.extend_from_slice(response_bad_request());
                return Err(e);
            }
        };

        debug!(
            method = %request.method,
            path = %request.path,
            upgrade = request.upgrade,
            "HTTP request"
        );

        if !request.upgrade {
            out.extend_from_slice(response_greeting());
            return Ok(ProcessResult::Close);
        }

        let mut session = ConnectionSession::new(self.max_frame_size, self.clock.clone());
        match session.handshake(request.key.as_deref()) {
            Ok(response) => out.extend_from_slice(&response),
            Err(e) => {
                out.extend_from_slice(response_bad_request());
                return Err(e);
            }
        }

        // The client may have pipelined its first frame behind the request
        let progress = if inbound.is_empty() {
            Progress::Open
        } else {
            session.on_readable(inbound, out)?
        };
        self.phase = Phase::WebSocket(session);

        Ok(match progress {
            Progress::Open => ProcessResult::NeedData,
            Progress::Closed => ProcessResult::Close,
        })
    }

    /// Mark the connection as closed (EOF, transport error, timeout).
    pub fn close(&mut self) {
        if let Phase::WebSocket(session) = &mut self.phase {
            session.close();
        }
        self.phase = Phase::Closing;
    }

    /// Session state, if the connection has been upgraded.
    pub fn session_state(&self) -> Option<SessionState> {
        match &self.phase {
            Phase::WebSocket(session) => Some(session.state()),
            _ => None,
        }
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry<T> {
    connections: Slab<T>,
    max_connections: usize,
}

impl<T> ConnectionRegistry<T> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: T) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<T> {
        self.connections.try_remove(id)
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::protocols::websocket::encoder::encode_masked;

    const UPGRADE: &[u8] = b"GET / HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: x3JJHMbDL1EzLkh9GBhXDw==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    fn connection() -> Connection<FixedClock> {
        Connection::new(65535, FixedClock::epoch())
    }

    #[test]
    fn test_plain_request_gets_greeting() {
        let mut conn = connection();
        let mut inbound = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"[..]);
        let mut out = BytesMut::new();

        assert_eq!(conn.process(&mut inbound, &mut out).unwrap(), ProcessResult::Close);
        assert_eq!(&out[..], response_greeting());
        assert!(matches!(conn.phase(), Phase::Closing));
    }

    #[test]
    fn test_partial_request() {
        let mut conn = connection();
        let mut inbound = BytesMut::from(&UPGRADE[..10]);
        let mut out = BytesMut::new();

        assert_eq!(conn.process(&mut inbound, &mut out).unwrap(), ProcessResult::NeedData);
        assert!(out.is_empty());
        assert!(matches!(conn.phase(), Phase::Http));
    }

    #[test]
    fn test_upgrade_then_echo() {
        let mut conn = connection();
        let mut inbound = BytesMut::from(UPGRADE);
        let mut out = BytesMut::new();

        assert_eq!(conn.process(&mut inbound, &mut out).unwrap(), ProcessResult::Response);
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.contains("Sec-WebSocket-Accept: HSmrc0sMlYUkAGmm5OPpG2HaGWk=\r\n"));
        assert_eq!(conn.session_state(), Some(SessionState::Open));

        out.clear();
        inbound.extend_from_slice(&encode_masked(br#"{"message":"hi"}"#, [1, 2, 3, 4]).unwrap());
        assert_eq!(conn.process(&mut inbound, &mut out).unwrap(), ProcessResult::Response);
        let expected = br#"{"message":{"message":"hi"},"at":"1970-01-01T00:00:00.000Z"}"#;
        assert_eq!(&out[2..], &expected[..]);
    }

    #[test]
    fn test_frame_pipelined_with_request() {
        let mut conn = connection();
        let mut inbound = BytesMut::from(UPGRADE);
        inbound.extend_from_slice(&encode_masked(b"[]", [1, 2, 3, 4]).unwrap());
        let mut out = BytesMut::new();

        assert_eq!(conn.process(&mut inbound, &mut out).unwrap(), ProcessResult::Response);
        assert!(inbound.is_empty());
        assert!(out.ends_with(br#"{"message":[],"at":"1970-01-01T00:00:00.000Z"}"#));
    }

    #[test]
    fn test_upgrade_without_key() {
        let mut conn = connection();
        let mut inbound =
            BytesMut::from(&b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n"[..]);
        let mut out = BytesMut::new();

        assert!(matches!(
            conn.process(&mut inbound, &mut out),
            Err(WsError::Handshake(_))
        ));
        assert_eq!(&out[..], response_bad_request());
        assert!(matches!(conn.phase(), Phase::Closing));
    }

    #[test]
    fn test_decode_error_closes_connection() {
        let mut conn = connection();
        let mut inbound = BytesMut::from(UPGRADE);
        let mut out = BytesMut::new();
        conn.process(&mut inbound, &mut out).unwrap();

        inbound.extend_from_slice(&encode_masked(b"{oops", [1, 2, 3, 4]).unwrap());
        assert!(matches!(
            conn.process(&mut inbound, &mut out),
            Err(WsError::FrameDecode(_))
        ));
        assert!(matches!(conn.phase(), Phase::Closing));
        assert_eq!(conn.process(&mut inbound, &mut out).unwrap(), ProcessResult::Close);
    }

    #[test]
    fn test_close_marks_session_closed() {
        let mut conn = connection();
        let mut inbound = BytesMut::from(UPGRADE);
        let mut out = BytesMut::new();
        conn.process(&mut inbound, &mut out).unwrap();

        conn.close();
        assert!(matches!(conn.phase(), Phase::Closing));
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let id1 = registry.insert("a").unwrap();
        let id2 = registry.insert("b").unwrap();

        // At capacity
        assert!(registry.is_full());
        assert!(registry.insert("c").is_none());

        assert_eq!(registry.get(id1), Some(&"a"));
        assert_eq!(registry.get(id2), Some(&"b"));

        assert_eq!(registry.remove(id1), Some("a"));
        assert!(registry.get(id1).is_none());
        assert!(registry.remove(id1).is_none());
        assert!(!registry.is_full());
        assert_eq!(registry.iter().count(), 1);
    }
}
