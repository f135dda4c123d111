//! Payload masking.
//!
//! XOR with `key[i % 4]`. The operation is its own inverse, so the same
//! routine masks and unmasks.

use super::MASK_KEY_LEN;

/// Apply (or remove) a masking key in place.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; MASK_KEY_LEN]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i % MASK_KEY_LEN];
    }
}
