//! WebSocket protocol implementation (RFC 6455, server side).
//!
//! Only the subset needed by the echo service is implemented:
//! - The HTTP upgrade handshake (`Sec-WebSocket-Accept` derivation)
//! - Decoding of masked client text frames (7, 16 and 64-bit length forms)
//! - Encoding of unmasked server text frames
//! - A per-connection session state machine driving the above
//!
//! ## Frame Layout
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                    Masking-key, if MASK set                   |
//! +-------------------------------+-------------------------------+
//! |                         Payload Data                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! Fragmentation, control frame replies, extensions and sub-protocols
//! are not supported.

pub mod encoder;
pub mod error;
pub mod handshake;
pub mod mask;
pub mod message;
pub mod parser;
pub mod session;

pub use error::WsError;
pub use message::ApplicationMessage;
pub use session::{ConnectionSession, Progress, SessionState};

/// GUID appended to the client key when computing `Sec-WebSocket-Accept`.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// First byte of every frame we send: FIN set, text opcode.
pub const FIN_TEXT: u8 = 0x80 | OPCODE_TEXT;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

/// Bit masks for the first two header bytes.
pub const FIN_BIT: u8 = 0x80;
pub const OPCODE_MASK: u8 = 0x0F;
pub const MASK_BIT: u8 = 0x80;
pub const LENGTH_MASK: u8 = 0x7F;

/// Largest payload length carried directly in the 7-bit field.
pub const MAX_LITERAL_LEN: u8 = 125;
/// 7-bit length sentinel: a 16-bit big-endian length follows.
pub const LEN_16_MARKER: u8 = 126;
/// 7-bit length sentinel: a 64-bit big-endian length follows.
pub const LEN_64_MARKER: u8 = 127;

/// Largest payload the 16-bit extended length can describe.
pub const MAX_PAYLOAD_LEN_16: usize = u16::MAX as usize;

/// Size of the client masking key.
pub const MASK_KEY_LEN: usize = 4;
