// ABOUTME: Tagged value tree for schemaless record content, including binary and link leaves.
// ABOUTME: Provides strict JSON rendering and the recursive binary-to-text fallback transform.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Ordered mapping from field name to value.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Errors raised when a value tree cannot be rendered as JSON.
#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("bytes at {path} are not valid utf-8 text")]
    InvalidUtf8 { path: String },

    #[error("float at {path} is not finite")]
    NonFiniteFloat { path: String },

    #[error("integer {value} at {path} does not fit in 64 bits")]
    IntegerOutOfRange { path: String, value: i128 },
}

/// Raised by a [`BinaryEncoder`] that cannot render a byte string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("binary encoding failed: {0}")]
pub struct EncodeError(pub String);

/// One node of decoded record content.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i128),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// A content-addressed link, held in its canonical string form.
    Link(String),
    List(Vec<FieldValue>),
    Map(FieldMap),
}

impl FieldValue {
    /// Render as JSON, failing on leaves that have no faithful text form.
    ///
    /// Byte strings must hold valid UTF-8 and are emitted as text. Links are
    /// emitted as `{"$link": "<cid>"}`.
    pub fn to_json(&self) -> Result<Value, ValueError> {
        self.to_json_at("$")
    }

    fn to_json_at(&self, path: &str) -> Result<Value, ValueError> {
        match self {
            FieldValue::Null => Ok(Value::Null),
            FieldValue::Bool(b) => Ok(Value::Bool(*b)),
            FieldValue::Integer(i) => integer_to_json(*i, path),
            FieldValue::Float(f) => Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| ValueError::NonFiniteFloat {
                    path: path.to_string(),
                }),
            FieldValue::Text(s) => Ok(Value::String(s.clone())),
            FieldValue::Bytes(bytes) => std::str::from_utf8(bytes)
                .map(|s| Value::String(s.to_string()))
                .map_err(|_| ValueError::InvalidUtf8 {
                    path: path.to_string(),
                }),
            FieldValue::Link(cid) => {
                let mut link = Map::new();
                link.insert("$link".to_string(), Value::String(cid.clone()));
                Ok(Value::Object(link))
            }
            FieldValue::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| item.to_json_at(&format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            FieldValue::Map(fields) => map_to_json_at(fields, path).map(Value::Object),
        }
    }
}

/// Render a field map as a JSON object using [`FieldValue::to_json`] rules.
pub fn map_to_json(fields: &FieldMap) -> Result<Map<String, Value>, ValueError> {
    map_to_json_at(fields, "$")
}

fn map_to_json_at(fields: &FieldMap, path: &str) -> Result<Map<String, Value>, ValueError> {
    let mut object = Map::new();
    for (key, value) in fields {
        let child = value.to_json_at(&format!("{}.{}", path, key))?;
        object.insert(key.clone(), child);
    }
    Ok(object)
}

fn integer_to_json(value: i128, path: &str) -> Result<Value, ValueError> {
    if let Ok(i) = i64::try_from(value) {
        return Ok(Value::from(i));
    }
    if let Ok(u) = u64::try_from(value) {
        return Ok(Value::from(u));
    }
    Err(ValueError::IntegerOutOfRange {
        path: path.to_string(),
        value,
    })
}

/// Renders binary leaves as text.
pub trait BinaryEncoder {
    fn encode(&self, bytes: &[u8]) -> Result<String, EncodeError>;
}

/// Standard-alphabet, padded base64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Encoder;

impl BinaryEncoder for Base64Encoder {
    fn encode(&self, bytes: &[u8]) -> Result<String, EncodeError> {
        Ok(STANDARD.encode(bytes))
    }
}

/// Replace every byte-string leaf with text.
///
/// Leaves go through `encoder`; when it fails the leaf becomes lowercase hex
/// and one warning is logged for that leaf. Links and all other leaves pass
/// through unchanged, so the result always renders with [`FieldValue::to_json`]
/// unless it holds non-finite floats or oversized integers.
pub fn binary_to_text(value: &FieldValue, encoder: &dyn BinaryEncoder) -> FieldValue {
    match value {
        FieldValue::Bytes(bytes) => FieldValue::Text(encode_leaf(bytes, encoder)),
        FieldValue::List(items) => {
            FieldValue::List(items.iter().map(|item| binary_to_text(item, encoder)).collect())
        }
        FieldValue::Map(fields) => FieldValue::Map(binary_map_to_text(fields, encoder)),
        other => other.clone(),
    }
}

/// [`binary_to_text`] over every value of a field map.
pub fn binary_map_to_text(fields: &FieldMap, encoder: &dyn BinaryEncoder) -> FieldMap {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), binary_to_text(value, encoder)))
        .collect()
}

fn encode_leaf(bytes: &[u8], encoder: &dyn BinaryEncoder) -> String {
    match encoder.encode(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                len = bytes.len(),
                error = %e,
                "failed to encode bytes, returning hex representation"
            );
            hex::encode(bytes)
        }
    }
}
