//! Re-encoding of decoded messages into protobuf wire data.
//!
//! The field key carries everything the encoder needs: the number goes into
//! the tag and the semantic type picks the wire type. Repeated fields are
//! written as one tag/value pair per element.
//!
//! Encoding runs in two passes over an explicit stack. The first checks
//! every value against its key and sums the payload length of each nested
//! message; the second writes the bytes, taking length prefixes from the
//! first pass. Nesting depth never touches the call stack and no nested
//! payload is buffered separately.

use crate::error::{Error, Result};
use crate::scalar::{encode_double, encode_float, encode_len};
use crate::value::{Entries, FieldKey, Message, Value};
use crate::wire::{encode_tag, encode_varint, encoded_varint_len};
use crate::MAX_FIELD_NUMBER;
use bytes::BufMut;
use tracing::debug;

/// Lengths gathered by the measuring pass
struct Layout {
    /// Encoded length of the root's fields
    len: usize,
    /// Payload length of each nested message, in the order the writer meets them
    nested: Vec<usize>,
}

/// A message whose payload length is still being summed
struct Pending<'a> {
    entries: Entries<'a>,
    slot: Option<usize>,
    len: usize,
}

/// Encode a message into a new buffer.
///
/// The root's fields are written back to back with no enclosing tag.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let layout = measure(message)?;
    let mut buf: Vec<u8> = Vec::with_capacity(layout.len);
    write(message, &layout, &mut buf);

    debug!(
        "Encoded {} top-level fields into {} bytes",
        message.len(),
        buf.len()
    );
    Ok(buf)
}

/// Encode a message's fields into `buf`.
///
/// Fails with [`Error::TypeMismatch`] if a value does not match the type
/// named by its key, or [`Error::InvalidFieldKey`] if a field number is out
/// of range. Nothing is written on failure.
pub fn encode_to(message: &Message, buf: &mut impl BufMut) -> Result<()> {
    let layout = measure(message)?;
    write(message, &layout, buf);
    Ok(())
}

fn measure(message: &Message) -> Result<Layout> {
    let mut nested = Vec::new();
    let mut root_len = 0;
    let mut stack = vec![Pending {
        entries: message.entries(),
        slot: None,
        len: 0,
    }];

    while let Some(top) = stack.last_mut() {
        if let Some((key, value)) = top.entries.next() {
            check(key, value)?;
            let header = tag_len(key);

            match value {
                Value::Message(inner) => {
                    top.len += header;
                    nested.push(0);
                    stack.push(Pending {
                        entries: inner.entries(),
                        slot: Some(nested.len() - 1),
                        len: 0,
                    });
                }
                scalar => top.len += header + scalar_len(scalar),
            }
            continue;
        }

        let Some(done) = stack.pop() else {
            break;
        };
        match (done.slot, stack.last_mut()) {
            (Some(slot), Some(parent)) => {
                nested[slot] = done.len;
                parent.len += encoded_varint_len(done.len as i64) + done.len;
            }
            _ => root_len = done.len,
        }
    }

    Ok(Layout {
        len: root_len,
        nested,
    })
}

fn write(message: &Message, layout: &Layout, buf: &mut impl BufMut) {
    let mut nested_lens = layout.nested.iter().copied();
    let mut stack = vec![message.entries()];

    while let Some(entries) = stack.last_mut() {
        let Some((key, value)) = entries.next() else {
            stack.pop();
            continue;
        };

        encode_tag(key.number(), key.semantic().wire_type(), buf);
        match value {
            Value::Number(n) => encode_varint(*n, buf),
            Value::Double(v) => encode_double(*v, buf),
            Value::Float(v) => encode_float(*v, buf),
            Value::String(s) => encode_len(s.as_bytes(), buf),
            Value::Message(inner) => {
                let len = nested_lens.next().unwrap_or_default();
                encode_varint(len as i64, buf);
                stack.push(inner.entries());
            }
        }
    }
}

fn check(key: &FieldKey, value: &Value) -> Result<()> {
    if key.number() == 0 || key.number() > MAX_FIELD_NUMBER {
        return Err(Error::invalid_field_key(key.to_string()));
    }
    if value.semantic_type() != key.semantic() {
        return Err(Error::type_mismatch(key, key.semantic().as_str()));
    }
    Ok(())
}

fn tag_len(key: &FieldKey) -> usize {
    encoded_varint_len((i64::from(key.number()) << 3) | key.semantic().wire_type() as i64)
}

/// Encoded length of a non-message value, excluding its tag
fn scalar_len(value: &Value) -> usize {
    match value {
        Value::Number(n) => encoded_varint_len(*n),
        Value::Double(_) => 8,
        Value::Float(_) => 4,
        Value::String(s) => encoded_varint_len(s.len() as i64) + s.len(),
        Value::Message(_) => 0,
    }
}
