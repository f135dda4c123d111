//! HTTP request parser and fixed responses.

use crate::protocols::websocket::WsError;

/// Maximum size of the request head.
pub const MAX_HEADER_SIZE: usize = 8192;

const MAX_HEADERS: usize = 32;

/// The parts of a request we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// `Upgrade: websocket` together with `Connection: upgrade`.
    pub upgrade: bool,
    /// `Sec-WebSocket-Key` header, if present.
    pub key: Option<String>,
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// Request head parsed, with the number of bytes it occupied.
    Complete(Request, usize),
    /// Need more data.
    Incomplete,
    /// Malformed or oversized request.
    Error(WsError),
}

/// Parse an HTTP request head from the front of `input`.
///
/// Bytes after the head (e.g. the client's first frame) are left for the
/// caller.
pub fn parse(input: &[u8]) -> ParseResult {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(input) {
        Ok(httparse::Status::Complete(len)) => {
            let mut upgrade = false;
            let mut connection_upgrade = false;
            let mut key = None;

            for header in req.headers.iter() {
                let Ok(value) = std::str::from_utf8(header.value) else {
                    return ParseResult::Error(WsError::Http("invalid header value"));
                };

                if header.name.eq_ignore_ascii_case("upgrade") {
                    upgrade |= value.to_ascii_lowercase().contains("websocket");
                } else if header.name.eq_ignore_ascii_case("connection") {
                    connection_upgrade |= value.to_ascii_lowercase().contains("upgrade");
                } else if header.name.eq_ignore_ascii_case("sec-websocket-key") {
                    key = Some(value.trim().to_string());
                }
            }

            ParseResult::Complete(
                Request {
                    method: req.method.unwrap_or("GET").to_string(),
                    path: req.path.unwrap_or("/").to_string(),
                    upgrade: upgrade && connection_upgrade,
                    key,
                },
                len,
            )
        }
        Ok(httparse::Status::Partial) if input.len() > MAX_HEADER_SIZE => {
            ParseResult::Error(WsError::Http("request head too large"))
        }
        Ok(httparse::Status::Partial) => ParseResult::Incomplete,
        Err(_) => ParseResult::Error(WsError::Http("failed to parse HTTP request")),
    }
}

/// Response to any plain (non-upgrade) request.
pub fn response_greeting() -> &'static [u8] {
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 9\r\nConnection: close\r\n\r\nHi there!"
}

/// Response to a malformed request or a failed upgrade.
pub fn response_bad_request() -> &'static [u8] {
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
}
