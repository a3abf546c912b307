//! Documents submitted by local producers and their canonical byte form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RelayError;

/// Bare tokens some producers emit for non-finite floats.
const NON_FINITE_TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// An arbitrary JSON value accepted from a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    pub fn from_value(value: Value) -> Self {
        Self(canonicalize(value))
    }

    /// Turn raw producer bytes into a document.
    ///
    /// The bytes must be UTF-8. Single quotes are rewritten to double quotes
    /// before parsing, and bare `NaN`/`Infinity`/`-Infinity` outside strings
    /// are accepted and stored as `null`.
    pub fn normalize(bytes: &[u8]) -> Result<Self, RelayError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RelayError::malformed(format!("input is not UTF-8: {e}")))?;
        let repaired = replace_non_finite(&text.replace('\'', "\""));
        let value: Value = serde_json::from_str(&repaired)
            .map_err(|e| RelayError::malformed(format!("invalid JSON: {e}")))?;
        Ok(Self::from_value(value))
    }

    /// Strict parse of bytes previously produced by [`Document::canonical_bytes`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| RelayError::malformed(format!("stored content is not JSON: {e}")))?;
        Ok(Self::from_value(value))
    }

    /// Compact JSON with object keys in sorted order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Serializing a `Value` cannot fail: keys are always strings.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn replace_non_finite(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = NON_FINITE_TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push_str("null");
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_quotes_are_repaired() {
        let doc = Document::normalize(b"{'a': 1}").unwrap();
        assert_eq!(doc.as_value(), &json!({"a": 1}));
        assert_eq!(doc.canonical_bytes(), b"{\"a\":1}");
    }

    #[test]
    fn test_non_finite_numbers_become_null() {
        let doc =
            Document::normalize(b"{\"x\": NaN, \"y\": [Infinity, -Infinity, 2.5]}").unwrap();
        assert_eq!(doc.as_value(), &json!({"x": null, "y": [null, null, 2.5]}));
    }

    #[test]
    fn test_tokens_inside_strings_untouched() {
        let doc = Document::normalize(b"{\"label\": \"NaN and Infinity\"}").unwrap();
        assert_eq!(doc.as_value(), &json!({"label": "NaN and Infinity"}));
    }

    #[test]
    fn test_escaped_quote_keeps_string_state() {
        let doc = Document::normalize(br#"{"q": "say \"NaN\"", "v": NaN}"#).unwrap();
        assert_eq!(doc.as_value(), &json!({"q": "say \"NaN\"", "v": null}));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        assert!(matches!(
            Document::normalize(b"not json"),
            Err(RelayError::MalformedDocument(_))
        ));
        assert!(matches!(
            Document::normalize(&[0xff, 0xfe, 0x00]),
            Err(RelayError::MalformedDocument(_))
        ));
        // An apostrophe inside a value breaks the quote repair.
        assert!(Document::normalize(b"{'name': 'O'Brien'}").is_err());
        assert!(Document::normalize(b"").is_err());
    }

    #[test]
    fn test_canonical_bytes_sort_keys() {
        let a = Document::normalize(b"{\"b\": 2, \"a\": {\"d\": 1, \"c\": 0}}").unwrap();
        let b = Document::normalize(b"{'a': {'c': 0, 'd': 1}, 'b': 2}").unwrap();

        assert_eq!(a.canonical_bytes(), b"{\"a\":{\"c\":0,\"d\":1},\"b\":2}");
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let doc = Document::normalize(b"[1, 'two', {'three': 3}]").unwrap();
        let back = Document::from_slice(&doc.canonical_bytes()).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_scalar_documents_allowed() {
        assert_eq!(Document::normalize(b"42").unwrap().as_value(), &json!(42));
        assert_eq!(Document::normalize(b"NaN").unwrap().as_value(), &Value::Null);
    }
}
