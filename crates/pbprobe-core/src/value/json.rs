//! JSON bridge for [`Message`].
//!
//! Keys keep their `"<n>/<type>"` form so a JSON document produced here can
//! be fed back to the encoder unchanged. Integers outside the range a JSON
//! double represents exactly are written as decimal strings.
//!
//! `serde_json` builds, drops and serializes values recursively, so every
//! conversion here refuses documents nested deeper than [`MAX_JSON_DEPTH`].

use super::{Field, FieldKey, Message, SemanticType, Value};
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Number, Value as JsonValue};

/// Largest integer a JSON double holds without loss (2^53 - 1)
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Deepest object/array nesting accepted when converting to or from JSON
pub const MAX_JSON_DEPTH: usize = 256;

impl Message {
    /// Render the message as a JSON object, preserving field order.
    ///
    /// Fails with [`Error::NestingTooDeep`] if the object would nest deeper
    /// than [`MAX_JSON_DEPTH`].
    pub fn to_json(&self) -> Result<JsonValue> {
        if self.json_depth() > MAX_JSON_DEPTH {
            return Err(Error::nesting_too_deep(MAX_JSON_DEPTH));
        }
        Ok(self.render_json())
    }

    /// Build a message from a JSON object with `"<n>/<type>"` keys.
    ///
    /// Arrays become repeated fields. Every value must match the type named
    /// by its key.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        if !json.is_object() {
            return Err(Error::NotAnObject);
        }
        if json_value_depth(json) > MAX_JSON_DEPTH {
            return Err(Error::nesting_too_deep(MAX_JSON_DEPTH));
        }
        message_from_json(json)
    }

    fn render_json(&self) -> JsonValue {
        let mut map = Map::with_capacity(self.len());

        for (key, field) in self {
            let value = match field {
                Field::Single(value) => value_to_json(value),
                Field::Repeated(values) => {
                    JsonValue::Array(values.iter().map(value_to_json).collect())
                }
            };
            map.insert(key.to_string(), value);
        }

        JsonValue::Object(map)
    }

    /// Object/array nesting of the rendered JSON, the root object counting one
    fn json_depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];

        while let Some((message, depth)) = pending.pop() {
            deepest = deepest.max(depth);

            for (_, field) in message {
                let depth = match field {
                    Field::Single(_) => depth,
                    Field::Repeated(_) => {
                        deepest = deepest.max(depth + 1);
                        depth + 1
                    }
                };
                for value in field.values() {
                    if let Value::Message(nested) = value {
                        pending.push((nested, depth + 1));
                    }
                }
            }
        }

        deepest
    }
}

/// Parse JSON text, refusing nesting deeper than [`MAX_JSON_DEPTH`]
pub fn parse_json(text: &[u8]) -> Result<JsonValue> {
    if nesting_exceeds(text, MAX_JSON_DEPTH) {
        return Err(Error::nesting_too_deep(MAX_JSON_DEPTH));
    }

    let mut deserializer = serde_json::Deserializer::from_slice(text);
    deserializer.disable_recursion_limit();

    let json = JsonValue::deserialize(&mut deserializer).map_err(Error::invalid_json)?;
    deserializer.end().map_err(Error::invalid_json)?;
    Ok(json)
}

/// True once the brackets of `text` open more than `max` levels deep.
/// Brackets inside string literals are skipped.
fn nesting_exceeds(text: &[u8], max: usize) -> bool {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for &byte in text {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > max {
                    return true;
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    false
}

fn json_value_depth(json: &JsonValue) -> usize {
    let mut deepest = 0;
    let mut pending = vec![(json, 1)];

    while let Some((json, depth)) = pending.pop() {
        match json {
            JsonValue::Array(items) => {
                deepest = deepest.max(depth);
                pending.extend(items.iter().map(|item| (item, depth + 1)));
            }
            JsonValue::Object(map) => {
                deepest = deepest.max(depth);
                pending.extend(map.values().map(|item| (item, depth + 1)));
            }
            _ => {}
        }
    }

    deepest
}

fn message_from_json(json: &JsonValue) -> Result<Message> {
    let map = json.as_object().ok_or(Error::NotAnObject)?;
    let mut message = Message::new();

    for (key, value) in map {
        let key: FieldKey = key.parse()?;

        let field = match value {
            JsonValue::Array(items) => Field::Repeated(
                items
                    .iter()
                    .map(|item| value_from_json(&key, item))
                    .collect::<Result<_>>()?,
            ),
            other => Field::Single(value_from_json(&key, other)?),
        };

        message.insert(key, field);
    }

    Ok(message)
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Number(n) if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(n) => {
            JsonValue::from(*n)
        }
        Value::Number(n) => JsonValue::String(n.to_string()),
        // NaN and infinities have no JSON form
        Value::Double(v) | Value::Float(v) => Number::from_f64(*v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Message(m) => m.render_json(),
    }
}

fn value_from_json(key: &FieldKey, json: &JsonValue) -> Result<Value> {
    match key.semantic() {
        SemanticType::Number => {
            let number = match json {
                JsonValue::Number(n) => n.as_i64().or_else(|| n.as_u64().map(|u| u as i64)),
                JsonValue::String(s) => parse_integer(s),
                _ => None,
            };
            number
                .map(Value::Number)
                .ok_or_else(|| Error::type_mismatch(key, "an integer or decimal string"))
        }
        SemanticType::Double | SemanticType::Float => {
            let float = match json {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::Null => Some(f64::NAN),
                _ => None,
            }
            .ok_or_else(|| Error::type_mismatch(key, "a number"))?;

            Ok(if key.semantic() == SemanticType::Double {
                Value::Double(float)
            } else {
                Value::Float(float)
            })
        }
        SemanticType::String => json
            .as_str()
            .map(Value::from)
            .ok_or_else(|| Error::type_mismatch(key, "a string")),
        SemanticType::Object => match json {
            JsonValue::Object(_) => message_from_json(json).map(Value::Message),
            _ => Err(Error::type_mismatch(key, "an object")),
        },
    }
}

/// Parse a decimal string as a signed or unsigned 64-bit integer.
/// Unsigned values above `i64::MAX` wrap to their two's-complement form.
fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<u64>().ok().map(|u| u as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_to_json_shapes() {
        let inner = Message::new().with(1, "x");
        let message = Message::new()
            .with(1, 1_i64)
            .with(5, "a")
            .with(5, "b")
            .with(7, inner);

        assert_eq!(
            message.to_json().unwrap(),
            json!({
                "1/number": 1,
                "5/string": ["a", "b"],
                "7/object": {"1/string": "x"}
            })
        );
    }

    #[test]
    fn test_to_json_key_order() {
        let message = Message::new().with(9, 1_i64).with(2, 1_i64).with(5, 1_i64);
        let text = serde_json::to_string(&message.to_json().unwrap()).unwrap();
        assert_eq!(text, r#"{"9/number":1,"2/number":1,"5/number":1}"#);
    }

    #[test]
    fn test_wide_integers_render_as_strings() {
        let message = Message::new()
            .with(1, MAX_SAFE_INTEGER)
            .with(2, MAX_SAFE_INTEGER + 1)
            .with(3, -1_i64)
            .with(4, i64::MIN);

        assert_eq!(
            message.to_json().unwrap(),
            json!({
                "1/number": 9_007_199_254_740_991_i64,
                "2/number": "9007199254740992",
                "3/number": -1,
                "4/number": "-9223372036854775808"
            })
        );
    }

    #[test]
    fn test_non_finite_floats_render_as_null() {
        let mut message = Message::new();
        message.push(1, Value::Double(f64::NAN)).unwrap();
        assert_eq!(message.to_json().unwrap(), json!({"1/double": null}));
    }

    #[test]
    fn test_from_json_round_trip() {
        let json = json!({
            "1/string": "",
            "2/number": 1,
            "4/string": "2024-07-29 01:17:11 8000",
            "7/object": {
                "1/object": {
                    "1/object": [
                        {"1/string": "7", "4/string": "测试节日", "10/number": 1},
                        {"1/string": "8"}
                    ],
                    "10000/number": 0,
                    "10001/string": "成功"
                }
            },
            "8/double": 1.5,
            "9/float": 0.25
        });

        let message = Message::from_json(&json).unwrap();
        assert_eq!(message.to_json().unwrap(), json);
    }

    #[test]
    fn test_from_json_integer_forms() {
        let message = Message::from_json(&json!({
            "1/number": "-9223372036854775808",
            "2/number": 18_446_744_073_709_551_615_u64,
            "3/number": "18446744073709551615"
        }))
        .unwrap();

        let numbers: Vec<i64> = message
            .iter()
            .filter_map(|(_, field)| field.first().and_then(Value::as_i64))
            .collect();
        assert_eq!(numbers, vec![i64::MIN, -1, -1]);
    }

    #[test]
    fn test_from_json_errors() {
        assert_eq!(Message::from_json(&json!([1, 2])), Err(Error::NotAnObject));
        assert_eq!(
            Message::from_json(&json!({"1/bytes": "x"})),
            Err(Error::unsupported_semantic_type("bytes"))
        );
        assert_eq!(
            Message::from_json(&json!({"abc": 1})),
            Err(Error::invalid_field_key("abc"))
        );
        assert_eq!(
            Message::from_json(&json!({"1/number": "one"})),
            Err(Error::type_mismatch("1/number", "an integer or decimal string"))
        );
        assert_eq!(
            Message::from_json(&json!({"2/object": {"3/string": 3}})),
            Err(Error::type_mismatch("3/string", "a string"))
        );
        assert!(Message::from_json(&json!({"1/float": "1.0"})).is_err());
    }

    fn nested_object(depth: usize) -> String {
        let mut text = "{\"1/number\":1}".to_string();
        for _ in 1..depth {
            text = format!("{{\"1/object\":{text}}}");
        }
        text
    }

    #[test]
    fn test_json_depth_counts_arrays() {
        let message = Message::new()
            .with(1, Message::new().with(2, 1_i64))
            .with(3, Message::new().with(4, "x"))
            .with(3, Message::new().with(4, "y"));
        assert_eq!(message.json_depth(), 3);
        assert_eq!(Message::new().json_depth(), 1);
    }

    #[test]
    fn test_to_json_depth_limit() {
        let mut message = Message::new();
        for _ in 0..MAX_JSON_DEPTH - 1 {
            let mut outer = Message::new();
            outer.push(1, Value::Message(message)).unwrap();
            message = outer;
        }
        assert!(message.to_json().is_ok());

        let mut outer = Message::new();
        outer.push(1, Value::Message(message)).unwrap();
        assert_eq!(
            outer.to_json(),
            Err(Error::nesting_too_deep(MAX_JSON_DEPTH))
        );
    }

    #[test]
    fn test_parse_json_beyond_default_recursion_limit() {
        let text = nested_object(200);
        let json = parse_json(text.as_bytes()).unwrap();
        let message = Message::from_json(&json).unwrap();
        assert_eq!(message.json_depth(), 200);
        assert_eq!(message.to_json().unwrap(), json);
    }

    #[test]
    fn test_parse_json_depth_limit() {
        assert!(parse_json(nested_object(MAX_JSON_DEPTH).as_bytes()).is_ok());
        assert_eq!(
            parse_json(nested_object(MAX_JSON_DEPTH + 1).as_bytes()),
            Err(Error::nesting_too_deep(MAX_JSON_DEPTH))
        );

        let brackets = "[".repeat(1_000_000);
        assert_eq!(
            parse_json(brackets.as_bytes()),
            Err(Error::nesting_too_deep(MAX_JSON_DEPTH))
        );
    }

    #[test]
    fn test_parse_json_ignores_brackets_in_strings() {
        let text = format!("{{\"1/string\":\"{}\\\"{}\"}}", "[".repeat(600), "{".repeat(600));
        let json = parse_json(text.as_bytes()).unwrap();
        assert_eq!(json_value_depth(&json), 1);
    }

    #[test]
    fn test_parse_json_errors() {
        assert!(matches!(
            parse_json(b"{\"1/number\": }"),
            Err(Error::InvalidJson { .. })
        ));
        assert!(matches!(
            parse_json(b"{} {}"),
            Err(Error::InvalidJson { .. })
        ));
    }
}
