//! Variable-length "Remaining Length" integer from the MQTT fixed header.
//!
//! Each byte carries 7 data bits, least-significant group first; the high bit
//! is a continuation flag.  At most 4 bytes are allowed, which caps the value
//! at [`MAX_ENCODABLE_REMAINING_LENGTH`].

use crate::protocol::codec::ProtocolError;
use crate::protocol::packets::MAX_ENCODABLE_REMAINING_LENGTH;

/// Maximum number of bytes a remaining-length field may occupy.
pub const MAX_REMAINING_LENGTH_BYTES: usize = 4;

const CONTINUATION: u8 = 0x80;
const DATA_MASK: u8 = 0x7F;

/// Appends the encoding of `len` to `buf`.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if `len` exceeds
/// [`MAX_ENCODABLE_REMAINING_LENGTH`].
pub fn encode_remaining_length(len: usize, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if len > MAX_ENCODABLE_REMAINING_LENGTH {
        return Err(ProtocolError::PayloadTooLarge {
            size: len,
            max: MAX_ENCODABLE_REMAINING_LENGTH,
        });
    }
    let mut value = len;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= CONTINUATION;
        }
        buf.push(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Number of bytes [`encode_remaining_length`] produces for `len`.
pub fn remaining_length_size(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Decodes a remaining-length field from the start of `bytes`.
///
/// Returns the decoded value and the number of bytes it occupied.
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] if `bytes` ends before a byte with
///   the continuation bit clear was seen (read more and retry).
/// - [`ProtocolError::MalformedRemainingLength`] if the 4th byte still has
///   the continuation bit set.
pub fn decode_remaining_length(bytes: &[u8]) -> Result<(usize, usize), ProtocolError> {
    let mut value: usize = 0;
    let mut multiplier: usize = 1;

    for (i, &byte) in bytes.iter().take(MAX_REMAINING_LENGTH_BYTES).enumerate() {
        value += (byte & DATA_MASK) as usize * multiplier;
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
        multiplier *= 128;
    }

    if bytes.len() >= MAX_REMAINING_LENGTH_BYTES {
        return Err(ProtocolError::MalformedRemainingLength);
    }
    Err(ProtocolError::InsufficientData {
        needed: bytes.len() + 1,
        available: bytes.len(),
    })
}
