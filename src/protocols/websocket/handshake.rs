//! WebSocket opening handshake.
//!
//! Computes: Base64(SHA-1(key + GUID))

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use super::WS_GUID;

/// Derive the `Sec-WebSocket-Accept` token for a client key.
///
/// The key is not validated; any input produces a digest.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Build the `101 Switching Protocols` response for an accept token.
pub fn build_response(accept: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept.as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_key_second_vector() {
        assert_eq!(
            accept_key("x3JJHMbDL1EzLkh9GBhXDw=="),
            "HSmrc0sMlYUkAGmm5OPpG2HaGWk="
        );
    }

    #[test]
    fn test_accept_key_empty() {
        // SHA-1 output is 20 bytes, base64 of that is always 28 chars
        assert_eq!(accept_key("").len(), 28);
    }

    #[test]
    fn test_build_response() {
        let response = build_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(
            &response[..],
            b"HTTP/1.1 101 Switching Protocols\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
              \r\n"
        );
    }
}
