//! Generic, order-preserving representation of a decoded message.
//!
//! Without a schema the only thing the wire gives us is a field number and
//! a wire type, so every field is stored under a [`FieldKey`] that pairs the
//! number with the [`SemanticType`] inferred during decoding. The encoder
//! reads the type back from the key to pick the wire representation.
//!
//! A field number that occurs more than once is promoted from a single
//! value to a [`Field::Repeated`] sequence, keeping buffer order.

mod json;

pub use json::{parse_json, MAX_JSON_DEPTH, MAX_SAFE_INTEGER};

use crate::error::{Error, Result};
use crate::wire::WireType;
use crate::MAX_FIELD_NUMBER;
use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

/// Type inferred for a field from its wire type and contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemanticType {
    /// Varint payload
    Number,
    /// 64-bit floating point payload
    Double,
    /// 32-bit floating point payload
    Float,
    /// Length-delimited payload holding UTF-8 text
    String,
    /// Length-delimited payload holding a nested message
    Object,
}

impl SemanticType {
    /// All recognised types, in key suffix order
    pub const ALL: [SemanticType; 5] = [
        SemanticType::Number,
        SemanticType::Double,
        SemanticType::Float,
        SemanticType::String,
        SemanticType::Object,
    ];

    /// Returns the key suffix for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Number => "number",
            SemanticType::Double => "double",
            SemanticType::Float => "float",
            SemanticType::String => "string",
            SemanticType::Object => "object",
        }
    }

    /// Wire type used to encode values of this type
    pub fn wire_type(&self) -> WireType {
        match self {
            SemanticType::Number => WireType::Varint,
            SemanticType::Double => WireType::I64,
            SemanticType::Float => WireType::I32,
            SemanticType::String | SemanticType::Object => WireType::Len,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| Error::unsupported_semantic_type(s))
    }
}

/// Composite `"<field-number>/<semantic-type>"` key of a message field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    number: u32,
    semantic: SemanticType,
}

impl FieldKey {
    /// Creates a key, validating the field number
    pub fn new(number: u32, semantic: SemanticType) -> Result<Self> {
        if number == 0 || number > MAX_FIELD_NUMBER {
            return Err(Error::invalid_field_key(format!("{number}/{semantic}")));
        }
        Ok(Self { number, semantic })
    }

    /// The protobuf field number
    pub fn number(&self) -> u32 {
        self.number
    }

    /// The inferred semantic type
    pub fn semantic(&self) -> SemanticType {
        self.semantic
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.semantic)
    }
}

impl FromStr for FieldKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (number, semantic) = s
            .split_once('/')
            .ok_or_else(|| Error::invalid_field_key(s))?;

        let number = number
            .parse::<u32>()
            .map_err(|_| Error::invalid_field_key(s))?;
        let semantic = semantic.parse::<SemanticType>()?;

        Self::new(number, semantic).map_err(|_| Error::invalid_field_key(s))
    }
}

/// A single decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Varint, reinterpreted as two's-complement 64-bit
    Number(i64),
    /// Fixed 64-bit float
    Double(f64),
    /// Fixed 32-bit float, widened
    Float(f64),
    /// Length-delimited UTF-8 text
    String(String),
    /// Length-delimited nested message
    Message(Message),
}

impl Value {
    /// The semantic type this value is stored under
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Value::Number(_) => SemanticType::Number,
            Value::Double(_) => SemanticType::Double,
            Value::Float(_) => SemanticType::Float,
            Value::String(_) => SemanticType::String,
            Value::Message(_) => SemanticType::Object,
        }
    }

    /// Returns the integer if this is a number
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float if this is a double or float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) | Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the nested message if this is an object
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Message> for Value {
    fn from(value: Message) -> Self {
        Value::Message(value)
    }
}

/// The contents stored under one field key
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// The field occurred once
    Single(Value),
    /// The field occurred several times, in buffer order
    Repeated(Vec<Value>),
}

impl Field {
    /// Add another occurrence, promoting a single value to a sequence
    pub fn push(&mut self, value: Value) {
        match self {
            Field::Repeated(values) => values.push(value),
            Field::Single(old) => {
                let old = std::mem::replace(old, Value::Number(0));
                *self = Field::Repeated(vec![old, value]);
            }
        }
    }

    /// Iterate over every occurrence
    pub fn values(&self) -> std::slice::Iter<'_, Value> {
        match self {
            Field::Single(value) => std::slice::from_ref(value).iter(),
            Field::Repeated(values) => values.iter(),
        }
    }

    /// The first occurrence, if any
    pub fn first(&self) -> Option<&Value> {
        self.values().next()
    }

    /// Number of occurrences
    pub fn len(&self) -> usize {
        match self {
            Field::Single(_) => 1,
            Field::Repeated(values) => values.len(),
        }
    }

    /// True for an empty repeated field
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An insertion-ordered message of keyed fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    fields: IndexMap<FieldKey, Field>,
}

impl Message {
    /// Creates an empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `number`, deriving the key from the value type.
    ///
    /// A key seen before is promoted to (or extended as) a repeated field.
    /// Fails with [`Error::InvalidFieldKey`] if `number` is outside
    /// `1..=MAX_FIELD_NUMBER`.
    pub fn push(&mut self, number: u32, value: Value) -> Result<()> {
        let key = FieldKey::new(number, value.semantic_type())?;
        self.push_keyed(key, value);
        Ok(())
    }

    /// Append a value under an explicit key, applying repeated-field promotion
    pub fn push_keyed(&mut self, key: FieldKey, value: Value) {
        match self.fields.get_mut(&key) {
            Some(field) => field.push(value),
            None => {
                self.fields.insert(key, Field::Single(value));
            }
        }
    }

    /// Builder form of [`Message::push`] for fixtures
    #[cfg(test)]
    pub(crate) fn with(mut self, number: u32, value: impl Into<Value>) -> Self {
        self.push(number, value.into()).unwrap();
        self
    }

    /// Replace the field stored under `key`
    pub fn insert(&mut self, key: FieldKey, field: Field) -> Option<Field> {
        self.fields.insert(key, field)
    }

    /// Look up a field
    pub fn get(&self, key: &FieldKey) -> Option<&Field> {
        self.fields.get(key)
    }

    /// Look up a field by its textual key, e.g. `"1/string"`
    pub fn get_str(&self, key: &str) -> Option<&Field> {
        key.parse::<FieldKey>().ok().and_then(|key| self.get(&key))
    }

    /// Iterate over fields in insertion order
    pub fn iter(&self) -> indexmap::map::Iter<'_, FieldKey, Field> {
        self.fields.iter()
    }

    /// Iterate over every value, flattening repeated fields
    pub(crate) fn entries(&self) -> Entries<'_> {
        Entries {
            fields: self.fields.iter(),
            current: None,
        }
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the message has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Drop for Message {
    // Nested messages are moved onto a work list so a deep chain never
    // drops recursively
    fn drop(&mut self) {
        if self.fields.is_empty() {
            return;
        }

        let mut pending: Vec<Message> = Vec::new();
        detach_nested(&mut self.fields, &mut pending);
        while let Some(mut message) = pending.pop() {
            detach_nested(&mut message.fields, &mut pending);
        }
    }
}

fn detach_nested(fields: &mut IndexMap<FieldKey, Field>, pending: &mut Vec<Message>) {
    for (_, field) in fields.drain(..) {
        match field {
            Field::Single(Value::Message(message)) => pending.push(message),
            Field::Single(_) => {}
            Field::Repeated(values) => {
                pending.extend(values.into_iter().filter_map(|value| match value {
                    Value::Message(message) => Some(message),
                    _ => None,
                }))
            }
        }
    }
}

/// Every value of a message as `(key, value)` pairs in field order, one pair
/// per element of a repeated field
pub(crate) struct Entries<'a> {
    fields: indexmap::map::Iter<'a, FieldKey, Field>,
    current: Option<(&'a FieldKey, std::slice::Iter<'a, Value>)>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = (&'a FieldKey, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, values)) = &mut self.current {
                if let Some(value) = values.next() {
                    return Some((*key, value));
                }
            }
            let (key, field) = self.fields.next()?;
            self.current = Some((key, field.values()));
        }
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = (&'a FieldKey, &'a Field);
    type IntoIter = indexmap::map::Iter<'a, FieldKey, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
