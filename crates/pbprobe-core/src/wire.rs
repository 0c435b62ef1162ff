//! Low-level protobuf wire format primitives.
//!
//! Every decoding function here takes the whole input buffer, an absolute
//! `offset` to start at and a `limit` it must not read past. The limit is the
//! end of the innermost enclosing frame, not the end of the buffer, so a
//! corrupt length prefix can never cause a read into sibling data.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 5: I32 (fixed32, sfixed32, float)
//!
//! Group markers (3 and 4) are deprecated and rejected.

use crate::error::{Error, Result};
use crate::MAX_FIELD_NUMBER;
use bytes::BufMut;

/// A varint never needs more than ten bytes for 64 bits
pub const MAX_VARINT_LEN: usize = 10;

/// Protobuf wire types understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// 32-bit fixed-width
    I32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            5 => Ok(WireType::I32),
            _ => Err(Error::unsupported_wire_type(value, 0)),
        }
    }
}

/// Decode a varint starting at `offset`, reading no further than `limit`.
///
/// The 64 accumulated bits are reinterpreted as a two's-complement `i64`, so
/// a ten byte varint with the top bit set decodes to a negative number.
///
/// Returns the decoded value and the offset just past the varint.
pub fn decode_varint(data: &[u8], offset: usize, limit: usize) -> Result<(i64, usize)> {
    let limit = limit.min(data.len());
    let mut result: u64 = 0;
    let mut position = offset;

    for i in 0..MAX_VARINT_LEN {
        if position >= limit {
            return Err(Error::truncated(offset));
        }

        let byte = data[position];
        position += 1;

        result |= u64::from(byte & 0x7F) << (7 * i);

        if byte & 0x80 == 0 {
            return Ok((result as i64, position));
        }
    }

    Err(Error::VarintOverflow { offset })
}

/// Encode a varint into `buf`.
///
/// Negative values are sign-extended to the full 64 bits before splitting,
/// which is why `-1` always takes ten bytes.
pub fn encode_varint(value: i64, buf: &mut impl BufMut) {
    let mut value = value as u64;

    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }

    buf.put_u8(value as u8);
}

/// Number of bytes [`encode_varint`] emits for `value`
pub fn encoded_varint_len(value: i64) -> usize {
    let bits = 64 - (value as u64 | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Decode a field tag starting at `offset`.
///
/// Returns the wire type, the field number and the offset just past the tag.
pub fn decode_tag(data: &[u8], offset: usize, limit: usize) -> Result<(WireType, u32, usize)> {
    let (tag, next) = decode_varint(data, offset, limit)?;

    let number = tag >> 3;
    if number < 1 || number > i64::from(MAX_FIELD_NUMBER) {
        return Err(Error::invalid_field_number(number, offset));
    }

    let bits = (tag & 0x07) as u8;
    let wire_type =
        WireType::try_from(bits).map_err(|_| Error::unsupported_wire_type(bits, offset))?;

    Ok((wire_type, number as u32, next))
}

/// Encode a field tag into `buf`
pub fn encode_tag(field_number: u32, wire_type: WireType, buf: &mut impl BufMut) {
    encode_varint((i64::from(field_number) << 3) | wire_type as i64, buf);
}
