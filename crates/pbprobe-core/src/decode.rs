//! Schema-less decoding of protobuf wire data.
//!
//! ## Algorithm Overview
//!
//! The decoder walks the buffer with a single cursor and keeps an explicit
//! stack of frames, one per length-delimited span it is currently treating
//! as a nested message:
//!
//! 1. Decode one field record inside the innermost frame
//! 2. A non-empty LEN payload opens a new frame over its byte range; the
//!    span is assumed to be a message until proven otherwise
//! 3. When the cursor reaches a frame's end the frame is closed and its
//!    message is attached to the parent under the frame's field number
//! 4. Any decode error inside a nested frame discards that frame and
//!    re-reads its span as UTF-8 text, resuming the parent at the span end
//!
//! Nesting depth is bounded only by the input size, never by the call
//! stack, and a failed attempt cannot disturb the parent's cursor because
//! the resume point always comes from the length prefix.

use crate::error::{Error, Result};
use crate::scalar::{decode_double, decode_float, decode_len, FloatRounding};
use crate::value::{Message, Value};
use crate::wire::{decode_tag, decode_varint, WireType};
use crate::MAX_FIELD_NUMBER;
use std::ops::Range;
use tracing::{debug, trace};

/// Configuration for the decoder
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Presentation policy for `double` and `float` payloads
    pub float_rounding: FloatRounding,
    /// Largest field number accepted in a tag
    pub max_field_number: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            float_rounding: FloatRounding::default(),
            max_field_number: MAX_FIELD_NUMBER,
        }
    }
}

impl DecoderConfig {
    /// Creates a new decoder config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the float rounding policy
    pub fn float_rounding(mut self, rounding: FloatRounding) -> Self {
        self.float_rounding = rounding;
        self
    }

    /// Sets the largest accepted field number, capped at the protobuf maximum
    pub fn max_field_number(mut self, max: u32) -> Self {
        self.max_field_number = max.min(MAX_FIELD_NUMBER);
        self
    }
}

/// What a single field record turned into
enum Step {
    /// A complete value; resume at `next`
    Value { number: u32, value: Value, next: usize },
    /// A LEN payload to try as a nested message
    Open { number: u32, span: Range<usize> },
}

/// A length-delimited span tentatively decoded as a message
struct Frame {
    message: Message,
    span: Range<usize>,
    field_number: u32,
}

/// Schema-less protobuf decoder
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    /// Creates a new decoder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new decoder with custom configuration
    pub fn with_config(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Returns the active configuration
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a complete buffer into a message.
    ///
    /// Fails if the buffer is not a plausible protobuf message. Failures
    /// inside nested spans are absorbed by reading the span as text; only a
    /// failure at the top level, or a span that is neither a message nor
    /// UTF-8, reaches the caller.
    pub fn decode(&self, data: &[u8]) -> Result<Message> {
        let mut root = Message::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut cursor = 0;

        loop {
            let end = stack.last().map_or(data.len(), |frame| frame.span.end);

            if cursor >= end {
                let Some(frame) = stack.pop() else {
                    break;
                };
                trace!(
                    "Closed field {} as message ({}..{})",
                    frame.field_number,
                    frame.span.start,
                    frame.span.end
                );
                innermost(&mut root, &mut stack)
                    .push(frame.field_number, Value::Message(frame.message))?;
                continue;
            }

            match self.step(data, cursor, end) {
                Ok(Step::Value {
                    number,
                    value,
                    next,
                }) => {
                    innermost(&mut root, &mut stack).push(number, value)?;
                    cursor = next;
                }
                Ok(Step::Open { number, span }) => {
                    trace!("Opened field {} at {}..{}", number, span.start, span.end);
                    cursor = span.start;
                    stack.push(Frame {
                        message: Message::new(),
                        span,
                        field_number: number,
                    });
                }
                Err(e) => {
                    cursor = fall_back_to_text(data, &mut root, &mut stack, e)?;
                }
            }
        }

        debug!(
            "Decoded {} bytes into {} top-level fields",
            data.len(),
            root.len()
        );
        Ok(root)
    }

    /// Decode the field record at `offset`, reading no further than `limit`
    fn step(&self, data: &[u8], offset: usize, limit: usize) -> Result<Step> {
        let (wire_type, number, cursor) = decode_tag(data, offset, limit)?;

        if number > self.config.max_field_number {
            return Err(Error::invalid_field_number(i64::from(number), offset));
        }

        let rounding = self.config.float_rounding;
        let (value, next) = match wire_type {
            WireType::Varint => {
                let (value, next) = decode_varint(data, cursor, limit)?;
                (Value::Number(value), next)
            }
            WireType::I64 => {
                let (value, next) = decode_double(data, cursor, limit, rounding)?;
                (Value::Double(value), next)
            }
            WireType::I32 => {
                let (value, next) = decode_float(data, cursor, limit, rounding)?;
                (Value::Float(value), next)
            }
            WireType::Len => {
                let span = decode_len(data, cursor, limit)?;
                // An empty span cannot hold a field record
                if !span.is_empty() {
                    return Ok(Step::Open { number, span });
                }
                (Value::String(String::new()), span.end)
            }
        };

        Ok(Step::Value {
            number,
            value,
            next,
        })
    }
}

/// The message currently receiving fields
fn innermost<'a>(root: &'a mut Message, stack: &'a mut [Frame]) -> &'a mut Message {
    match stack.last_mut() {
        Some(frame) => &mut frame.message,
        None => root,
    }
}

/// Abandon the innermost nested frame and attach its span as text instead.
///
/// Returns the offset the parent resumes at. A span that is not UTF-8 counts
/// as a failure of its parent, so the fallback climbs until some enclosing
/// span reads as text or the root is reached.
fn fall_back_to_text(
    data: &[u8],
    root: &mut Message,
    stack: &mut Vec<Frame>,
    mut error: Error,
) -> Result<usize> {
    loop {
        if !error.is_recoverable() {
            return Err(error);
        }
        let Some(frame) = stack.pop() else {
            return Err(error);
        };

        trace!(
            "Field {} at {}..{} is not a message ({}), reading as text",
            frame.field_number,
            frame.span.start,
            frame.span.end,
            error
        );

        match std::str::from_utf8(&data[frame.span.clone()]) {
            Ok(text) => {
                innermost(root, stack).push(frame.field_number, Value::from(text))?;
                return Ok(frame.span.end);
            }
            Err(_) => {
                error = Error::undecodable(frame.field_number, frame.span.start);
            }
        }
    }
}

/// Decode a buffer with the default configuration
pub fn decode(data: &[u8]) -> Result<Message> {
    Decoder::new().decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::encode_len;
    use crate::value::Field;
    use crate::wire::{encode_tag, encode_varint, encoded_varint_len};
    use pretty_assertions::assert_eq;
    use prost::Message as _;
    use serde_json::json;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Fish {
        #[prost(string, tag = "1")]
        name: String,
        #[prost(int64, tag = "2")]
        weight: i64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct Catch {
        #[prost(int32, tag = "1")]
        code: i32,
        #[prost(message, optional, tag = "2")]
        fish: Option<Fish>,
        #[prost(string, repeated, tag = "3")]
        tags: Vec<String>,
        #[prost(double, tag = "4")]
        ratio: f64,
        #[prost(float, tag = "5")]
        scale: f32,
    }

    #[test]
    fn test_single_varint() {
        let message = decode(&[0x08, 0x01]).unwrap();
        assert_eq!(message.to_json().unwrap(), json!({"1/number": 1}));
    }

    #[test]
    fn test_empty_input() {
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_prost_encoded_message() {
        let catch = Catch {
            code: -5,
            fish: Some(Fish {
                name: "perch".to_string(),
                weight: 9001,
            }),
            tags: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            ratio: 0.5,
            scale: 1.25,
        };

        let message = decode(&catch.encode_to_vec()).unwrap();

        let expected = Message::new()
            .with(1, -5_i64)
            .with(2, Message::new().with(1, "perch").with(2, 9001_i64))
            .with(3, "a")
            .with(3, "b")
            .with(3, "c")
            .with(4, Value::Double(0.5))
            .with(5, Value::Float(1.25));
        assert_eq!(message, expected);
    }

    #[test]
    fn test_text_is_not_mistaken_for_message() {
        // "hello" starts like a tag but hits wire type 4 on the third byte
        let data = [0x0A, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let message = decode(&data).unwrap();
        assert_eq!(message.to_json().unwrap(), json!({"1/string": "hello"}));
    }

    #[test]
    fn test_message_shaped_text_decodes_as_object() {
        // Inherent to schema-less decoding: the bytes "\x08\x01" read as a message
        let data = [0x0A, 0x02, 0x08, 0x01];
        let message = decode(&data).unwrap();
        assert_eq!(message.to_json().unwrap(), json!({"1/object": {"1/number": 1}}));
    }

    #[test]
    fn test_zero_length_is_empty_string() {
        let data = [0x0A, 0x00, 0x10, 0x02];
        let message = decode(&data).unwrap();
        assert_eq!(message.to_json().unwrap(), json!({"1/string": "", "2/number": 2}));
    }

    #[test]
    fn test_repeated_promotion() {
        let data = [0x2A, 0x01, b'a', 0x2A, 0x01, b'b', 0x2A, 0x01, b'c'];
        let message = decode(&data).unwrap();
        assert_eq!(message.to_json().unwrap(), json!({"5/string": ["a", "b", "c"]}));
    }

    #[test]
    fn test_root_errors_are_terminal() {
        assert_eq!(decode(&[0x0B]), Err(Error::unsupported_wire_type(3, 0)));
        assert_eq!(decode(&[0x08]), Err(Error::truncated(1)));
        assert_eq!(
            decode(&[0x00, 0x01]),
            Err(Error::invalid_field_number(0, 0))
        );
        assert_eq!(decode(&[0x09, 0x00, 0x00]), Err(Error::truncated(1)));
    }

    #[test]
    fn test_nested_reads_are_bounded_by_frame() {
        // Field 1 spans two bytes holding a LEN prefix of 3, which would fit
        // in the buffer but not in the frame
        let data = [0x0A, 0x02, 0x12, 0x03, 0x10, 0x01, 0x18, 0x02];
        let message = decode(&data).unwrap();
        assert_eq!(
            message.to_json().unwrap(),
            json!({"1/string": "\u{12}\u{3}", "2/number": 1, "3/number": 2})
        );
    }

    #[test]
    fn test_fallback_discards_partial_fields() {
        // The nested attempt decodes 2/number before failing on wire type 7
        let data = [0x0A, 0x03, 0x10, 0x01, 0x0F, 0x18, 0x01];
        let message = decode(&data).unwrap();
        assert_eq!(
            message.to_json().unwrap(),
            json!({"1/string": "\u{10}\u{1}\u{f}", "3/number": 1})
        );
    }

    #[test]
    fn test_undecodable_field() {
        let data = [0x0A, 0x02, 0xFF, 0xFF];
        assert_eq!(decode(&data), Err(Error::undecodable(1, 2)));
    }

    #[test]
    fn test_undecodable_nested_field_climbs_to_root() {
        let data = [0x0A, 0x03, 0x0A, 0x01, 0xFF];
        assert_eq!(decode(&data), Err(Error::undecodable(1, 2)));
    }

    /// `depth` levels of field 1 wrapped around `{1: 1}`
    fn nested(depth: usize) -> Vec<u8> {
        let mut lens = vec![2_usize];
        for _ in 0..depth {
            let inner = lens[lens.len() - 1];
            lens.push(1 + encoded_varint_len(inner as i64) + inner);
        }

        let mut data: Vec<u8> = Vec::with_capacity(lens[depth]);
        for len in lens[..depth].iter().rev() {
            encode_tag(1, WireType::Len, &mut data);
            encode_varint(*len as i64, &mut data);
        }
        data.extend_from_slice(&[0x08, 0x01]);
        data
    }

    #[test]
    fn test_deep_nesting() {
        const DEPTH: usize = 1_000;

        let mut payload = vec![0x08, 0x01];
        for _ in 0..DEPTH {
            let mut wrapped: Vec<u8> = Vec::new();
            encode_tag(1, WireType::Len, &mut wrapped);
            encode_len(&payload, &mut wrapped);
            payload = wrapped;
        }
        assert_eq!(payload, nested(DEPTH));

        let message = decode(&payload).unwrap();

        let mut current = &message;
        for _ in 0..DEPTH {
            current = current
                .get_str("1/object")
                .and_then(Field::first)
                .and_then(Value::as_message)
                .unwrap();
        }
        assert_eq!(current.to_json().unwrap(), json!({"1/number": 1}));
    }

    #[test]
    fn test_very_deep_nesting_decodes_and_drops() {
        const DEPTH: usize = 200_000;

        let message = decode(&nested(DEPTH)).unwrap();

        let mut levels = 0;
        let mut current = &message;
        while let Some(inner) = current
            .get_str("1/object")
            .and_then(Field::first)
            .and_then(Value::as_message)
        {
            levels += 1;
            current = inner;
        }
        assert_eq!(levels, DEPTH);
        drop(message);
    }

    #[test]
    fn test_failed_frame_holding_deep_child_is_discarded() {
        // The deep chain closes inside field 2 before wire type 7 fails it
        let chain = nested(200_000);
        let mut data: Vec<u8> = Vec::new();
        encode_tag(2, WireType::Len, &mut data);
        encode_varint(chain.len() as i64 + 1, &mut data);
        data.extend_from_slice(&chain);
        data.push(0x0F);

        assert!(matches!(
            decode(&data),
            Err(Error::UndecodableField {
                field_number: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_file_descriptor_proto() {
        use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

        let file = FileDescriptorProto {
            name: Some("demo.proto".to_string()),
            package: Some("demo".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Ping".to_string()),
                field: vec![FieldDescriptorProto {
                    name: Some("id".to_string()),
                    number: Some(1),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };

        let message = decode(&file.encode_to_vec()).unwrap();
        assert_eq!(
            message.to_json().unwrap(),
            json!({
                "1/string": "demo.proto",
                "2/string": "demo",
                "4/object": {
                    "1/string": "Ping",
                    "2/object": {"1/string": "id", "3/number": 1}
                }
            })
        );
    }

    #[test]
    fn test_float_rounding_policy() {
        let mut data: Vec<u8> = Vec::new();
        encode_tag(1, WireType::I32, &mut data);
        crate::scalar::encode_float(0.1, &mut data);

        let rounded = decode(&data).unwrap();
        assert_eq!(rounded.to_json().unwrap(), json!({"1/float": 0.1}));

        let exact = Decoder::with_config(DecoderConfig::new().float_rounding(FloatRounding::Exact))
            .decode(&data)
            .unwrap();
        let value = exact
            .get_str("1/float")
            .and_then(Field::first)
            .and_then(Value::as_f64)
            .unwrap();
        assert_eq!(value, f64::from(0.1_f32));
    }

    #[test]
    fn test_max_field_number_config() {
        let data = [0xF8, 0x01, 0x01];
        assert!(decode(&data).is_ok());

        let decoder = Decoder::with_config(DecoderConfig::new().max_field_number(15));
        assert_eq!(
            decoder.decode(&data),
            Err(Error::invalid_field_number(31, 0))
        );
    }
}
