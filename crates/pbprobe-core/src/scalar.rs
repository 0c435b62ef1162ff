//! Fixed-width and length-delimited payload codecs.

use crate::error::{Error, Result};
use crate::wire::{decode_varint, encode_varint};
use bytes::{Buf, BufMut};
use std::ops::Range;

/// How decoded `double` and `float` payloads are presented.
///
/// Rounding makes values stable for display, but a rounded value no longer
/// re-encodes to the exact original bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatRounding {
    /// Keep the full IEEE-754 value
    Exact,
    /// Round to this many decimal digits
    Decimals(u8),
}

impl Default for FloatRounding {
    fn default() -> Self {
        FloatRounding::Decimals(5)
    }
}

impl FloatRounding {
    /// Apply the policy to a decoded value. Non-finite values pass through.
    pub fn apply(self, value: f64) -> f64 {
        match self {
            FloatRounding::Exact => value,
            FloatRounding::Decimals(_) if !value.is_finite() => value,
            FloatRounding::Decimals(digits) => format!("{:.*}", usize::from(digits), value)
                .parse()
                .unwrap_or(value),
        }
    }
}

/// Borrow `len` bytes at `offset`, failing if they cross `limit`
fn fixed_span(data: &[u8], offset: usize, limit: usize, len: usize) -> Result<&[u8]> {
    let limit = limit.min(data.len());
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(&data[offset..end]),
        _ => Err(Error::truncated(offset)),
    }
}

/// Decode a little-endian IEEE-754 double (wire type 1)
pub fn decode_double(
    data: &[u8],
    offset: usize,
    limit: usize,
    rounding: FloatRounding,
) -> Result<(f64, usize)> {
    let mut span = fixed_span(data, offset, limit, 8)?;
    Ok((rounding.apply(span.get_f64_le()), offset + 8))
}

/// Decode a little-endian IEEE-754 single (wire type 5), widened to `f64`
pub fn decode_float(
    data: &[u8],
    offset: usize,
    limit: usize,
    rounding: FloatRounding,
) -> Result<(f64, usize)> {
    let mut span = fixed_span(data, offset, limit, 4)?;
    Ok((rounding.apply(f64::from(span.get_f32_le())), offset + 4))
}

/// Decode the length prefix of a LEN field.
///
/// Returns the absolute byte range of the payload. The range is guaranteed
/// to lie within `offset..limit`.
pub fn decode_len(data: &[u8], offset: usize, limit: usize) -> Result<Range<usize>> {
    let (length, start) = decode_varint(data, offset, limit)?;
    let limit = limit.min(data.len());

    let end = u64::try_from(length)
        .ok()
        .and_then(|length| usize::try_from(length).ok())
        .and_then(|length| start.checked_add(length))
        .filter(|&end| end <= limit)
        .ok_or_else(|| Error::truncated(offset))?;

    Ok(start..end)
}

/// Encode a double as 8 little-endian bytes
pub fn encode_double(value: f64, buf: &mut impl BufMut) {
    buf.put_f64_le(value);
}

/// Encode a float as 4 little-endian bytes
pub fn encode_float(value: f64, buf: &mut impl BufMut) {
    buf.put_f32_le(value as f32);
}

/// Encode a length prefix followed by the payload
pub fn encode_len(payload: &[u8], buf: &mut impl BufMut) {
    encode_varint(payload.len() as i64, buf);
    buf.put_slice(payload);
}
