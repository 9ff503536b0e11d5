//! JSON interop for the document model.
//!
//! Numbers map to `Int64` when integral and `Double` otherwise. The
//! non-JSON wire types round-trip through tagged single-key objects so
//! dumps stay inspectable with ordinary JSON tooling.

use serde_json::{Map, Number, json};

use crate::error::{InvalidJsonSnafu, Result};
use crate::value::{Document, Value};

/// Converts a top-level JSON value into a document.
///
/// Only objects are documents; any other top-level value is an error.
pub fn document_from_json(value: serde_json::Value) -> Result<Document> {
    match value {
        serde_json::Value::Object(map) => Ok(object_to_document(map)),
        other => InvalidJsonSnafu {
            message: format!("expected an object, got {}", json_type_name(&other)),
        }
        .fail(),
    }
}

pub fn document_to_json(doc: &Document) -> serde_json::Value {
    let map: Map<String, serde_json::Value> = doc
        .iter()
        .map(|(key, value)| (key.to_string(), value_to_json(value)))
        .collect();
    serde_json::Value::Object(map)
}

fn object_to_document(map: Map<String, serde_json::Value>) -> Document {
    map.into_iter()
        .map(|(key, value)| (key, value_from_json(value)))
        .collect()
}

fn value_from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(v),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(v) => Value::Int64(v),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(v) => Value::String(v),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(value_from_json).collect())
        }
        serde_json::Value::Object(map) => Value::Document(object_to_document(map)),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => json!(v),
        Value::Int32(v) => json!(v),
        Value::Int64(v) => json!(v),
        Value::Double(v) => Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(v) => json!(v),
        Value::Binary(bytes) => json!({"$binary": hex(bytes)}),
        Value::Timestamp(ts) => json!({"$timestamp": {"t": ts >> 32, "i": ts & 0xffff_ffff}}),
        Value::DateTime(millis) => json!({"$date": millis}),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Document(doc) => document_to_json(doc),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
