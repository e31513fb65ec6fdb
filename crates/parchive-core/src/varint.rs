//! Variable-length Integer Encoding (Varint)
//!
//! Each byte carries 7 bits of payload and a continuation flag, so small
//! numbers take a single byte. Signed values go through ZigZag first
//! (0 → 0, -1 → 1, 1 → 2, -2 → 3, ...) so that small negative deltas stay small.
//!
//! The segment codec stores the time column as deltas between consecutive
//! samples. Samples inside a segment are sorted, so the deltas are small and
//! non-negative, typically one or two bytes each.
//!
//! Decoding is used on blobs read back from the archive, so it never panics:
//! truncated or overlong input yields [`Error::InvalidSegment`].

use bytes::{Buf, BufMut};

use crate::{Error, Result};

/// Encode a signed integer as a varint (ZigZag encoding)
pub fn encode_varint(buf: &mut impl BufMut, value: i64) {
    let unsigned = ((value << 1) ^ (value >> 63)) as u64;
    encode_varint_u64(buf, unsigned);
}

/// Encode an unsigned integer as a varint
pub fn encode_varint_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Decode a ZigZag varint to a signed integer
pub fn decode_varint(buf: &mut impl Buf) -> Result<i64> {
    let unsigned = decode_varint_u64(buf)?;

    let value = (unsigned >> 1) as i64;
    if (unsigned & 1) != 0 {
        Ok(!value)
    } else {
        Ok(value)
    }
}

/// Decode a varint to an unsigned integer
pub fn decode_varint_u64(buf: &mut impl Buf) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::InvalidSegment("truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(value);
        }

        shift += 7;
        if shift >= 64 {
            return Err(Error::InvalidSegment("varint too large".to_string()));
        }
    }
}
