//! # pbprobe-core
//!
//! A schema-less codec for Protocol Buffer wire data.
//!
//! Given nothing but raw bytes, the decoder infers the structure of a
//! message and produces an order-preserving [`Message`] keyed by
//! `"<field-number>/<semantic-type>"`. The encoder turns such a message back
//! into wire bytes.
//!
//! ## Architecture
//!
//! - [`wire`]: varint and tag codecs
//! - [`scalar`]: fixed-width and length-delimited payloads
//! - [`value`]: the decoded message model and its JSON form
//! - [`decode`]: the frame-stack decoder with the message/text fallback
//! - [`encode`]: the inverse walk
//! - [`error`]: error types and handling
//!
//! ## Example
//!
//! ```
//! use pbprobe_core::{decode, encode};
//!
//! // Field 1 (varint) = 150, field 2 (LEN) = "hello"
//! let data = [0x08, 0x96, 0x01, 0x12, 0x05, b'h', b'e', b'l', b'l', b'o'];
//!
//! let message = decode(&data)?;
//! assert_eq!(
//!     message.to_json()?,
//!     serde_json::json!({"1/number": 150, "2/string": "hello"})
//! );
//! assert_eq!(encode(&message)?, data);
//! # Ok::<(), pbprobe_core::Error>(())
//! ```
//!
//! ## Ambiguity
//!
//! Length-delimited payloads are first decoded as nested messages and read
//! as text only if that fails. Text that happens to be valid wire data is
//! therefore reported as an object; without a schema there is no way to
//! tell the two apart.
//!
//! ## Depth
//!
//! Decoding, encoding and dropping a [`Message`] never recurse, so binary
//! input of any nesting depth is safe. The JSON bridge is limited to
//! [`MAX_JSON_DEPTH`] levels.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod scalar;
pub mod value;
pub mod wire;

// Re-export primary types for convenience
pub use decode::{decode, Decoder, DecoderConfig};
pub use encode::{encode, encode_to};
pub use error::{Error, Result};
pub use scalar::FloatRounding;
pub use value::{parse_json, Field, FieldKey, Message, SemanticType, Value, MAX_JSON_DEPTH};
pub use wire::WireType;

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Decode a buffer and render it as JSON
pub fn decode_to_json(data: &[u8]) -> Result<serde_json::Value> {
    decode(data)?.to_json()
}

/// Encode a JSON object with `"<n>/<type>"` keys
pub fn encode_json(json: &serde_json::Value) -> Result<Vec<u8>> {
    encode(&Message::from_json(json)?)
}
