//! WebSocket frame encoder (server → client).
//!
//! Server frames are never masked. Lengths up to 65535 bytes are supported;
//! larger payloads are rejected instead of being given a 64-bit length.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::{Result, WsError};
use super::message::ApplicationMessage;
use super::{FIN_TEXT, LEN_16_MARKER, MAX_LITERAL_LEN, MAX_PAYLOAD_LEN_16};

/// Encode a message as a single unmasked text frame.
pub fn encode(message: &ApplicationMessage) -> Result<Bytes> {
    let payload = message.as_bytes();
    let mut buf = BytesMut::with_capacity(header_len(payload.len())? + payload.len());
    put_header(&mut buf, payload.len(), 0)?;
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Header size for a payload of `len` bytes (unmasked).
fn header_len(len: usize) -> Result<usize> {
    if len <= MAX_LITERAL_LEN as usize {
        Ok(2)
    } else if len <= MAX_PAYLOAD_LEN_16 {
        Ok(4)
    } else {
        Err(WsError::FrameLengthUnsupported(len as u64))
    }
}

fn put_header(buf: &mut BytesMut, len: usize, mask_bit: u8) -> Result<()> {
    buf.put_u8(FIN_TEXT);
    if len <= MAX_LITERAL_LEN as usize {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= MAX_PAYLOAD_LEN_16 {
        buf.put_u8(mask_bit | LEN_16_MARKER);
        buf.put_u16(len as u16);
    } else {
        return Err(WsError::FrameLengthUnsupported(len as u64));
    }
    Ok(())
}

/// Encode a masked client frame, as a browser would send it.
#[cfg(test)]
pub(crate) fn encode_masked(payload: &[u8], key: [u8; super::MASK_KEY_LEN]) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    put_header(&mut buf, payload.len(), super::MASK_BIT)?;
    buf.put_slice(&key);
    let start = buf.len();
    buf.put_slice(payload);
    super::mask::apply_mask(&mut buf[start..], key);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_small() {
        let frame = encode(&ApplicationMessage::from("hi")).unwrap();
        assert_eq!(&frame[..], &[0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_empty() {
        let frame = encode(&ApplicationMessage::from("")).unwrap();
        assert_eq!(&frame[..], &[0x81, 0x00]);
    }

    #[test]
    fn test_encode_125_uses_literal_length() {
        let frame = encode(&ApplicationMessage::from("a".repeat(125))).unwrap();
        assert_eq!(frame.len(), 2 + 125);
        assert_eq!(frame[1], 125);
    }

    #[test]
    fn test_encode_126_uses_16_bit_length() {
        let frame = encode(&ApplicationMessage::from("a".repeat(126))).unwrap();
        assert_eq!(frame.len(), 4 + 126);
        assert_eq!(frame[1], LEN_16_MARKER);
        assert_eq!(&frame[2..4], &[0x00, 0x7e]);
    }

    #[test]
    fn test_encode_65535_fits() {
        let frame = encode(&ApplicationMessage::from("a".repeat(65535))).unwrap();
        assert_eq!(frame[1], LEN_16_MARKER);
        assert_eq!(&frame[2..4], &[0xff, 0xff]);
        assert_eq!(frame.len(), 4 + 65535);
    }

    #[test]
    fn test_encode_65536_rejected() {
        match encode(&ApplicationMessage::from("a".repeat(65536))) {
            Err(WsError::FrameLengthUnsupported(65536)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_encode_is_never_masked() {
        let frame = encode(&ApplicationMessage::from("x".repeat(300))).unwrap();
        assert_eq!(frame[1] & super::super::MASK_BIT, 0);
        assert!(frame[4..].iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_encode_masked_client_frame() {
        let frame = encode_masked(b"Hello", [0x37, 0xfa, 0x21, 0x3d]).unwrap();
        assert_eq!(
            &frame[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }
}
