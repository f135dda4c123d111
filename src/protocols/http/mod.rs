//! Minimal HTTP/1.1 front door.
//!
//! Every connection starts here. The first request decides what happens
//! next:
//!
//! ```text
//! GET / HTTP/1.1                  →  200 "Hi there!", connection closed
//! GET / HTTP/1.1
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: <nonce>      →  handed to the WebSocket session
//! ```
//!
//! Keep-alive and request bodies are not supported.

pub mod parser;

pub use parser::{parse, ParseResult};
