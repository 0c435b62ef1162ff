//! Error types for the pbprobe-core library.
//!
//! This module provides error handling using the `thiserror` crate, with one
//! variant per way a schema-less decode or encode can fail.

use thiserror::Error;

/// Result type alias for pbprobe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all pbprobe operations
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The buffer or enclosing range ended before a field was complete
    #[error("truncated input at offset {offset}: field runs past the end of its enclosing range")]
    TruncatedInput {
        /// Byte offset where the incomplete read started
        offset: usize,
    },

    /// A tag carried a wire type other than 0, 1, 2 or 5
    #[error("unsupported wire type {wire_type} at offset {offset}")]
    UnsupportedWireType {
        /// The raw wire type bits
        wire_type: u8,
        /// Byte offset of the tag
        offset: usize,
    },

    /// A tag carried a field number outside `1..=max`
    #[error("invalid field number {number} at offset {offset}")]
    InvalidFieldNumber {
        /// The decoded field number (may be negative for corrupt tags)
        number: i64,
        /// Byte offset of the tag
        offset: usize,
    },

    /// A varint kept its continuation bit set past ten bytes
    #[error("varint at offset {offset} is longer than 10 bytes")]
    VarintOverflow {
        /// Byte offset where the varint started
        offset: usize,
    },

    /// A length-delimited span is neither a message nor UTF-8 text
    #[error("field {field_number} at offset {offset} is neither a nested message nor UTF-8 text")]
    UndecodableField {
        /// Field number the span was attached to
        field_number: u32,
        /// Byte offset where the span starts
        offset: usize,
    },

    /// A field key named a semantic type that the codec does not know
    #[error("unsupported semantic type '{name}'")]
    UnsupportedSemanticType {
        /// The unrecognised type suffix
        name: String,
    },

    /// A field key is not of the form `<number>/<type>`
    #[error("invalid field key '{key}': expected '<field-number>/<type>'")]
    InvalidFieldKey {
        /// The offending key
        key: String,
    },

    /// A value's shape disagrees with the type suffix of its key
    #[error("value for '{key}' does not match its declared type, expected {expected}")]
    TypeMismatch {
        /// The field key the value was stored under
        key: String,
        /// Human readable description of the expected shape
        expected: &'static str,
    },

    /// A structured value that must be a message was something else
    #[error("expected a message object at the root")]
    NotAnObject,

    /// A JSON document or its message nests deeper than the bridge allows
    #[error("nesting exceeds the JSON depth limit of {max}")]
    NestingTooDeep {
        /// The depth limit
        max: usize,
    },

    /// JSON text failed to parse
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// Parser diagnostic
        message: String,
    },
}

impl Error {
    /// Creates a new truncated input error
    pub fn truncated(offset: usize) -> Self {
        Self::TruncatedInput { offset }
    }

    /// Creates a new unsupported wire type error
    pub fn unsupported_wire_type(wire_type: u8, offset: usize) -> Self {
        Self::UnsupportedWireType { wire_type, offset }
    }

    /// Creates a new invalid field number error
    pub fn invalid_field_number(number: i64, offset: usize) -> Self {
        Self::InvalidFieldNumber { number, offset }
    }

    /// Creates a new undecodable field error
    pub fn undecodable(field_number: u32, offset: usize) -> Self {
        Self::UndecodableField {
            field_number,
            offset,
        }
    }

    /// Creates a new unsupported semantic type error
    pub fn unsupported_semantic_type(name: impl Into<String>) -> Self {
        Self::UnsupportedSemanticType { name: name.into() }
    }

    /// Creates a new invalid field key error
    pub fn invalid_field_key(key: impl Into<String>) -> Self {
        Self::InvalidFieldKey { key: key.into() }
    }

    /// Creates a new type mismatch error
    pub fn type_mismatch(key: impl ToString, expected: &'static str) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            expected,
        }
    }

    /// Creates a new nesting depth error
    pub fn nesting_too_deep(max: usize) -> Self {
        Self::NestingTooDeep { max }
    }

    /// Creates a new JSON parse error
    pub fn invalid_json(err: impl std::fmt::Display) -> Self {
        Self::InvalidJson {
            message: err.to_string(),
        }
    }

    /// Returns true if a nested frame failing with this error may be
    /// reinterpreted as text instead of aborting the decode
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TruncatedInput { .. }
                | Self::UnsupportedWireType { .. }
                | Self::InvalidFieldNumber { .. }
                | Self::VarintOverflow { .. }
                | Self::UndecodableField { .. }
        )
    }
}
