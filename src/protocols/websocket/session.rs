//! Per-connection WebSocket session.
//!
//! The session is sans-IO: the runtime owns the socket, feeds inbound bytes
//! in and writes whatever the session appends to the outbound buffer.
//!
//! ```text
//! New ──handshake──▶ Handshaking ──▶ Open ──error/close/EOF──▶ Closed
//! ```

use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use super::encoder;
use super::error::{DecodeError, Result, WsError};
use super::handshake::{accept_key, build_response};
use super::message::ApplicationMessage;
use super::parser::{self, OpCode, ParseResult};
use crate::clock::{Clock, SystemClock};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Handshaking,
    Open,
    Closed,
}

/// Outcome of feeding inbound bytes to an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Session stays open, waiting for more frames.
    Open,
    /// Client sent a close frame; the connection should be shut down.
    Closed,
}

/// Reply envelope sent back for every text message.
#[derive(Serialize)]
struct Reply<'a> {
    message: &'a Value,
    at: String,
}

/// One upgraded connection.
#[derive(Debug)]
pub struct ConnectionSession<C = SystemClock> {
    state: SessionState,
    max_frame_size: usize,
    clock: C,
}

impl<C: Clock> ConnectionSession<C> {
    pub fn new(max_frame_size: usize, clock: C) -> Self {
        Self {
            state: SessionState::New,
            max_frame_size,
            clock,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Complete the upgrade for the client's `Sec-WebSocket-Key`.
    ///
    /// Returns the `101 Switching Protocols` response to write to the socket.
    pub fn handshake(&mut self, key: Option<&str>) -> Result<Bytes> {
        if self.state != SessionState::New {
            return Err(WsError::Protocol("handshake already performed"));
        }
        self.state = SessionState::Handshaking;

        let Some(key) = key else {
            self.state = SessionState::Closed;
            return Err(WsError::Handshake("missing Sec-WebSocket-Key"));
        };

        let response = build_response(&accept_key(key));
        self.state = SessionState::Open;
        Ok(response)
    }

    /// Decode every complete frame in `inbound`, appending one encoded reply
    /// per text message to `out`.
    ///
    /// Consumed bytes are removed from `inbound`; a trailing partial frame is
    /// left in place for the next call. Any error closes the session.
    pub fn on_readable(&mut self, inbound: &mut BytesMut, out: &mut BytesMut) -> Result<Progress> {
        match self.state {
            SessionState::Open => {}
            SessionState::Closed => return Err(WsError::Protocol("session is closed")),
            _ => return Err(WsError::Protocol("handshake not completed")),
        }

        let result = self.drain(inbound, out);
        if !matches!(result, Ok(Progress::Open)) {
            self.state = SessionState::Closed;
        }
        result
    }

    fn drain(&self, inbound: &mut BytesMut, out: &mut BytesMut) -> Result<Progress> {
        loop {
            match parser::parse(&inbound[..], self.max_frame_size) {
                ParseResult::Complete(frame, consumed) => {
                    inbound.advance(consumed);
                    trace!(
                        fin = frame.fin,
                        opcode = ?frame.opcode,
                        masked = frame.masked,
                        len = frame.payload.len(),
                        "Frame received"
                    );

                    match frame.opcode {
                        OpCode::Text => {
                            let message = ApplicationMessage::from_bytes(frame.payload);
                            out.extend_from_slice(&self.reply(&message)?);
                        }
                        OpCode::Close => return Ok(Progress::Closed),
                        _ => return Err(WsError::Protocol("only text frames are supported")),
                    }
                }
                ParseResult::Incomplete(awaiting) => {
                    trace!(?awaiting, buffered = inbound.len(), "Waiting for frame data");
                    return Ok(Progress::Open);
                }
                ParseResult::Error(e) => return Err(e),
            }
        }
    }

    /// Build the encoded reply frame for one message.
    pub fn reply(&self, message: &ApplicationMessage) -> Result<Bytes> {
        let envelope = Reply {
            message: message.json()?,
            at: self.clock.timestamp(),
        };
        let text = serde_json::to_string(&envelope).map_err(DecodeError::Json)?;
        encoder::encode(&ApplicationMessage::from(text))
    }

    /// Mark the session closed (peer EOF, transport error, timeout).
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}
