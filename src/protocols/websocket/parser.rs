//! WebSocket frame parser (client → server).
//!
//! Parses one frame from the front of an input buffer. The buffer may hold
//! a partial frame (the caller reads more and calls again) or several
//! frames (the caller advances by `consumed` and calls again).

use bytes::Bytes;

use super::error::WsError;
use super::mask::apply_mask;
use super::{
    FIN_BIT, LENGTH_MASK, LEN_16_MARKER, LEN_64_MARKER, MASK_BIT, MASK_KEY_LEN, OPCODE_BINARY,
    OPCODE_CLOSE, OPCODE_CONTINUATION, OPCODE_MASK, OPCODE_PING, OPCODE_PONG, OPCODE_TEXT,
};

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcode (0x3-0x7, 0xB-0xF).
    Reserved(u8),
}

impl OpCode {
    pub fn from_u8(byte: u8) -> Self {
        match byte & OPCODE_MASK {
            OPCODE_CONTINUATION => OpCode::Continuation,
            OPCODE_TEXT => OpCode::Text,
            OPCODE_BINARY => OpCode::Binary,
            OPCODE_CLOSE => OpCode::Close,
            OPCODE_PING => OpCode::Ping,
            OPCODE_PONG => OpCode::Pong,
            other => OpCode::Reserved(other),
        }
    }
}

/// A decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub mask_key: Option<[u8; MASK_KEY_LEN]>,
    pub payload: Bytes,
}

/// Which part of the frame is still missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaiting {
    Header,
    ExtendedLength,
    MaskKey,
    Payload,
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// A complete frame and the number of input bytes it occupied.
    Complete(Frame, usize),
    /// Need more data.
    Incomplete(Awaiting),
    /// The frame can never be accepted; the connection should be closed.
    Error(WsError),
}

/// Parse one client frame from the front of `input`.
///
/// Payloads longer than `max_payload` are rejected as soon as the length
/// is known, before the payload itself has arrived.
pub fn parse(input: &[u8], max_payload: usize) -> ParseResult {
    if input.len() < 2 {
        return ParseResult::Incomplete(Awaiting::Header);
    }

    // FIN and RSV bits are not acted on: every frame is treated as final
    let fin = input[0] & FIN_BIT != 0;
    let opcode = OpCode::from_u8(input[0]);

    let masked = input[1] & MASK_BIT != 0;
    let indicator = input[1] & LENGTH_MASK;

    if !masked {
        return ParseResult::Error(WsError::Protocol("client frames must be masked"));
    }

    let mut pos = 2;
    let payload_len = match indicator {
        LEN_16_MARKER => {
            if input.len() < pos + 2 {
                return ParseResult::Incomplete(Awaiting::ExtendedLength);
            }
            let len = u16::from_be_bytes([input[pos], input[pos + 1]]);
            pos += 2;
            len as u64
        }
        LEN_64_MARKER => {
            if input.len() < pos + 8 {
                return ParseResult::Incomplete(Awaiting::ExtendedLength);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&input[pos..pos + 8]);
            return ParseResult::Error(WsError::FrameLengthUnsupported(u64::from_be_bytes(raw)));
        }
        literal => literal as u64,
    };

    if payload_len > max_payload as u64 {
        return ParseResult::Error(WsError::FrameTooLarge {
            len: payload_len,
            max: max_payload,
        });
    }
    let payload_len = payload_len as usize;

    if input.len() < pos + MASK_KEY_LEN {
        return ParseResult::Incomplete(Awaiting::MaskKey);
    }
    let mut mask_key = [0u8; MASK_KEY_LEN];
    mask_key.copy_from_slice(&input[pos..pos + MASK_KEY_LEN]);
    pos += MASK_KEY_LEN;

    let payload = if payload_len == 0 {
        Bytes::new()
    } else {
        if input.len() < pos + payload_len {
            return ParseResult::Incomplete(Awaiting::Payload);
        }
        let mut data = input[pos..pos + payload_len].to_vec();
        apply_mask(&mut data, mask_key);
        pos += payload_len;
        Bytes::from(data)
    };

    ParseResult::Complete(
        Frame {
            fin,
            opcode,
            masked,
            mask_key: Some(mask_key),
            payload,
        },
        pos,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::websocket::encoder::encode_masked;
    use crate::protocols::websocket::{ApplicationMessage, MAX_PAYLOAD_LEN_16};

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];
    const MAX: usize = MAX_PAYLOAD_LEN_16;

    #[test]
    fn test_parse_rfc_masked_hello() {
        let input = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        match parse(&input, MAX) {
            ParseResult::Complete(frame, consumed) => {
                assert_eq!(consumed, 11);
                assert!(frame.fin);
                assert!(frame.masked);
                assert_eq!(frame.opcode, OpCode::Text);
                assert_eq!(frame.mask_key, Some(KEY));
                assert_eq!(&frame.payload[..], b"Hello");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_literal_125() {
        let payload = vec![b'a'; 125];
        let input = encode_masked(&payload, KEY).unwrap();
        assert_eq!(input[1], MASK_BIT | 125);

        match parse(&input, MAX) {
            ParseResult::Complete(frame, consumed) => {
                assert_eq!(consumed, 2 + 4 + 125);
                assert_eq!(&frame.payload[..], &payload[..]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_extended_16() {
        let payload = vec![b'b'; 126];
        let input = encode_masked(&payload, KEY).unwrap();
        assert_eq!(input[1], MASK_BIT | LEN_16_MARKER);

        match parse(&input, MAX) {
            ParseResult::Complete(frame, consumed) => {
                assert_eq!(consumed, 2 + 2 + 4 + 126);
                assert_eq!(frame.payload.len(), 126);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_zero_length() {
        let input = [0x81, 0x80, 1, 2, 3, 4];
        match parse(&input, MAX) {
            ParseResult::Complete(frame, 6) => assert!(frame.payload.is_empty()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_64_bit_length_rejected() {
        let mut input = vec![0x81, MASK_BIT | LEN_64_MARKER];
        input.extend_from_slice(&70_000u64.to_be_bytes());
        input.extend_from_slice(&KEY);

        match parse(&input, usize::MAX) {
            ParseResult::Error(WsError::FrameLengthUnsupported(70_000)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_frame_too_large() {
        let input = encode_masked(&[b'x'; 200], KEY).unwrap();
        match parse(&input[..4], 100) {
            ParseResult::Error(WsError::FrameTooLarge { len: 200, max: 100 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unmasked_rejected() {
        let input = [0x81, 0x02, b'h', b'i'];
        match parse(&input, MAX) {
            ParseResult::Error(WsError::Protocol(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_incomplete_phases() {
        let input = encode_masked(&[b'z'; 300], KEY).unwrap();

        let phase = |n: usize| match parse(&input[..n], MAX) {
            ParseResult::Incomplete(awaiting) => awaiting,
            other => panic!("unexpected at {n}: {:?}", other),
        };

        assert_eq!(phase(0), Awaiting::Header);
        assert_eq!(phase(1), Awaiting::Header);
        assert_eq!(phase(3), Awaiting::ExtendedLength);
        assert_eq!(phase(6), Awaiting::MaskKey);
        assert_eq!(phase(8), Awaiting::Payload);
        assert_eq!(phase(input.len() - 1), Awaiting::Payload);
    }

    #[test]
    fn test_parse_split_then_complete() {
        let input = encode_masked(br#"{"message":"hi"}"#, KEY).unwrap();
        let mut buf = Vec::new();

        for (i, byte) in input.iter().enumerate() {
            buf.push(*byte);
            match parse(&buf, MAX) {
                ParseResult::Incomplete(_) if i + 1 < input.len() => {}
                ParseResult::Complete(frame, consumed) if i + 1 == input.len() => {
                    assert_eq!(consumed, input.len());
                    assert_eq!(&frame.payload[..], br#"{"message":"hi"}"#);
                }
                other => panic!("unexpected at {i}: {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_back_to_back_frames() {
        let mut input = encode_masked(b"[1]", KEY).unwrap().to_vec();
        input.extend_from_slice(&encode_masked(b"[2]", [9, 8, 7, 6]).unwrap());

        let consumed = match parse(&input, MAX) {
            ParseResult::Complete(frame, consumed) => {
                assert_eq!(&frame.payload[..], b"[1]");
                consumed
            }
            other => panic!("unexpected: {:?}", other),
        };
        match parse(&input[consumed..], MAX) {
            ParseResult::Complete(frame, _) => assert_eq!(&frame.payload[..], b"[2]"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_through_encoder() {
        for len in [0usize, 1, 125, 126, 4096, MAX_PAYLOAD_LEN_16] {
            let text = format!("\"{}\"", "é".repeat(len.saturating_sub(2) / 2));
            let message = ApplicationMessage::from(text);
            let input = encode_masked(message.as_bytes(), KEY).unwrap();

            match parse(&input, MAX) {
                ParseResult::Complete(frame, consumed) => {
                    assert_eq!(consumed, input.len());
                    assert_eq!(ApplicationMessage::from_bytes(frame.payload), message);
                }
                other => panic!("unexpected for len {len}: {:?}", other),
            }
        }
    }

    #[test]
    fn test_opcode_from_u8() {
        assert_eq!(OpCode::from_u8(0x81), OpCode::Text);
        assert_eq!(OpCode::from_u8(0x88), OpCode::Close);
        assert_eq!(OpCode::from_u8(0x02), OpCode::Binary);
        assert_eq!(OpCode::from_u8(0x03), OpCode::Reserved(3));
    }
}
