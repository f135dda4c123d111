//! Error types for WebSocket connections.
//!
//! Every variant is scoped to a single connection: the runtime closes the
//! affected connection and reports the error, other connections keep going.

use std::fmt;
use std::io;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, WsError>;

/// WebSocket connection errors.
#[derive(Debug)]
pub enum WsError {
    /// Upgrade request could not be completed (e.g. missing `Sec-WebSocket-Key`).
    Handshake(&'static str),
    /// 64-bit extended length on decode, or a payload above 65535 bytes on encode.
    FrameLengthUnsupported(u64),
    /// Frame payload exceeds the configured limit.
    FrameTooLarge { len: u64, max: usize },
    /// Payload is not valid UTF-8 or not valid JSON.
    FrameDecode(DecodeError),
    /// Frame violates the subset of the protocol we speak.
    Protocol(&'static str),
    /// Malformed HTTP request before the upgrade.
    Http(&'static str),
    /// Socket read or write failure.
    Transport(io::Error),
}

/// Failure to turn a frame payload into an application message.
#[derive(Debug)]
pub enum DecodeError {
    Utf8(std::str::Utf8Error),
    Json(serde_json::Error),
}

impl WsError {
    /// Short, stable name of the error kind for structured reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            WsError::Handshake(_) => "handshake",
            WsError::FrameLengthUnsupported(_) => "frame_length_unsupported",
            WsError::FrameTooLarge { .. } => "frame_too_large",
            WsError::FrameDecode(_) => "frame_decode",
            WsError::Protocol(_) => "protocol",
            WsError::Http(_) => "http",
            WsError::Transport(_) => "transport",
        }
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsError::Handshake(msg) => write!(f, "handshake failed: {msg}"),
            WsError::FrameLengthUnsupported(len) => {
                write!(f, "unsupported frame length: {len} bytes")
            }
            WsError::FrameTooLarge { len, max } => {
                write!(f, "frame too large: {len} > {max} bytes")
            }
            WsError::FrameDecode(e) => write!(f, "failed to decode message: {e}"),
            WsError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            WsError::Http(msg) => write!(f, "invalid HTTP request: {msg}"),
            WsError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for WsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WsError::FrameDecode(e) => Some(e),
            WsError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Utf8(e) => write!(f, "invalid UTF-8: {e}"),
            DecodeError::Json(e) => write!(f, "invalid JSON: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Utf8(e) => Some(e),
            DecodeError::Json(e) => Some(e),
        }
    }
}

impl From<io::Error> for WsError {
    fn from(err: io::Error) -> Self {
        WsError::Transport(err)
    }
}

impl From<DecodeError> for WsError {
    fn from(err: DecodeError) -> Self {
        WsError::FrameDecode(err)
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(err: std::str::Utf8Error) -> Self {
        DecodeError::Utf8(err)
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err)
    }
}
