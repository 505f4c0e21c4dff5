//! # Document metadata
//!
//! Caller-supplied key/value data attached to each stored document. Values are
//! restricted to a closed set of scalars so the sidecar stays flat and the
//! index never has to reason about arbitrary JSON.
//!
//! Loosely-typed input (for example a JSON body from an upstream service)
//! is validated once, at the boundary, with [`metadata_from_json`].
//!
//! ```rust
//! use awful_rag::metadata::{metadata_from_json, MetadataValue};
//!
//! let meta = metadata_from_json(&serde_json::json!({"source": "notes.md", "page": 3})).unwrap();
//! assert_eq!(meta["source"], MetadataValue::from("notes.md"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::IndexError;

/// A single metadata scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

/// Ordered mapping so the sidecar is byte-stable across writes.
pub type Metadata = BTreeMap<String, MetadataValue>;

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Number(n) => write!(f, "{n}"),
            MetadataValue::String(s) => f.write_str(s),
        }
    }
}

/// Validate a JSON object into [`Metadata`].
///
/// Accepts only an object whose values are strings, numbers or booleans.
/// `null`, arrays and nested objects are rejected rather than coerced.
pub fn metadata_from_json(value: &JsonValue) -> Result<Metadata, IndexError> {
    let JsonValue::Object(map) = value else {
        return Err(IndexError::InvalidMetadata(format!(
            "expected a JSON object, got {value}"
        )));
    };

    map.iter()
        .map(|(key, v)| {
            let scalar = match v {
                JsonValue::Bool(b) => MetadataValue::Bool(*b),
                JsonValue::Number(n) => n.as_f64().map(MetadataValue::Number).ok_or_else(|| {
                    IndexError::InvalidMetadata(format!("`{key}` is not a finite number"))
                })?,
                JsonValue::String(s) => MetadataValue::String(s.clone()),
                other => {
                    return Err(IndexError::InvalidMetadata(format!(
                        "`{key}` must be a string, number or bool, got {other}"
                    )));
                }
            };
            Ok((key.clone(), scalar))
        })
        .collect()
}

/// Parse a `key=value` pair as typed on the command line.
///
/// `true`/`false` become booleans, anything that parses as `f64` becomes a
/// number, the rest stays a string.
pub fn parse_pair(pair: &str) -> Result<(String, MetadataValue), IndexError> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| IndexError::InvalidMetadata(format!("`{pair}` is not key=value")))?;
    if key.is_empty() {
        return Err(IndexError::InvalidMetadata(format!("`{pair}` has an empty key")));
    }

    let value = match raw {
        "true" => MetadataValue::Bool(true),
        "false" => MetadataValue::Bool(false),
        _ => match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => MetadataValue::Number(n),
            _ => MetadataValue::String(raw.to_string()),
        },
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_flat_scalars() {
        let meta = metadata_from_json(&json!({"id": "doc-7", "score": 0.5, "pinned": true})).unwrap();
        assert_eq!(meta.len(), 3);
        assert_eq!(meta["id"], MetadataValue::from("doc-7"));
        assert_eq!(meta["score"], MetadataValue::Number(0.5));
        assert_eq!(meta["pinned"], MetadataValue::Bool(true));
    }

    #[test]
    fn rejects_nested_and_null() {
        assert!(metadata_from_json(&json!({"tags": ["a", "b"]})).is_err());
        assert!(metadata_from_json(&json!({"inner": {"x": 1}})).is_err());
        assert!(metadata_from_json(&json!({"gone": null})).is_err());
        assert!(metadata_from_json(&json!("not an object")).is_err());
    }

    #[test]
    fn untagged_serialization_is_plain_json() {
        let mut meta = Metadata::new();
        meta.insert("source".into(), "a.md".into());
        meta.insert("chunk".into(), MetadataValue::from(2_i64));
        let text = serde_json::to_string(&meta).unwrap();
        assert_eq!(text, r#"{"chunk":2.0,"source":"a.md"}"#);

        let back: Metadata = serde_json::from_str(&text).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn parses_cli_pairs() {
        assert_eq!(parse_pair("lang=rust").unwrap().1, MetadataValue::from("rust"));
        assert_eq!(parse_pair("n=4").unwrap().1, MetadataValue::Number(4.0));
        assert_eq!(parse_pair("ok=false").unwrap().1, MetadataValue::Bool(false));
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }
}
