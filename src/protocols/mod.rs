//! Protocol implementations.
//!
//! Each protocol has a parser module used by the runtime event loops.
//!
//! - `http`: request head parsing and the plain-request greeting
//! - `websocket`: handshake, frame codec and per-connection session

pub mod http;
pub mod websocket;
