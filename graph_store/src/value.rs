// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tagged document values for item and link metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A structured metadata value.
///
/// Metadata travels through the store as an explicit tagged document rather
/// than loose JSON so that schema validation and equality checks are exact
/// (no float-vs-int coercion surprises at the boundary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<MetaValue>),
    Object(BTreeMap<String, MetaValue>),
}

impl Default for MetaValue {
    fn default() -> Self {
        Self::Null
    }
}

impl MetaValue {
    /// An empty document (`{}`).
    pub fn empty_object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// True for `Null`, an empty string, an empty array or an empty object.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            Self::Array(a) => a.is_empty(),
            Self::Object(o) => o.is_empty(),
            Self::Bool(_) | Self::Int(_) | Self::Float(_) => false,
        }
    }

    /// Field lookup on an object value.
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Navigate a dot-separated path (`"a.b.c"`) through nested objects.
    pub fn path(&self, path: &str) -> Option<&MetaValue> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// The type name used in schema declarations and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Serialize to a compact JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("invalid metadata document: {e}"))
    }
}

impl From<serde_json::Value> for MetaValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(a) => Self::Array(a.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(o) => {
                Self::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            },
        }
    }
}

/// Validate a metadata document against a declared schema.
///
/// The schema is itself a document: an object mapping field names to either
/// a type name string (`"string"`, `"int"`, `"float"`, `"bool"`, `"array"`,
/// `"object"`, `"any"`) or a nested object schema. Every declared field is
/// required; undeclared fields pass through unchecked.
pub fn validate_meta(value: &MetaValue, schema: &MetaValue) -> std::result::Result<(), String> {
    validate_at(value, schema, "$")
}

/// Check that a declared schema is itself well-formed: nested objects with
/// known type names at the leaves.
pub fn check_schema(schema: &MetaValue) -> std::result::Result<(), String> {
    match schema {
        MetaValue::Object(fields) => {
            for (name, field) in fields {
                check_schema(field).map_err(|e| format!("{name}: {e}"))?;
            }
            Ok(())
        },
        MetaValue::String(type_name) => match type_name.as_str() {
            "any" | "null" | "bool" | "int" | "float" | "string" | "array" | "object" => Ok(()),
            other => Err(format!("unknown schema type '{other}'")),
        },
        other => Err(format!(
            "schema node must be an object or type name, got {}",
            other.type_name()
        )),
    }
}

fn validate_at(value: &MetaValue, schema: &MetaValue, at: &str) -> std::result::Result<(), String> {
    match schema {
        MetaValue::Object(fields) => {
            let MetaValue::Object(doc) = value else {
                return Err(format!("{at}: expected object, got {}", value.type_name()));
            };
            for (name, field_schema) in fields {
                let path = format!("{at}.{name}");
                match doc.get(name) {
                    Some(v) => validate_at(v, field_schema, &path)?,
                    None => return Err(format!("{path}: required field missing")),
                }
            }
            Ok(())
        },
        MetaValue::String(type_name) => {
            let ok = match type_name.as_str() {
                "any" => true,
                "null" => matches!(value, MetaValue::Null),
                "bool" => matches!(value, MetaValue::Bool(_)),
                "int" => matches!(value, MetaValue::Int(_)),
                "float" => matches!(value, MetaValue::Float(_) | MetaValue::Int(_)),
                "string" => matches!(value, MetaValue::String(_)),
                "array" => matches!(value, MetaValue::Array(_)),
                "object" => matches!(value, MetaValue::Object(_)),
                other => return Err(format!("{at}: unknown schema type '{other}'")),
            };
            if ok {
                Ok(())
            } else {
                Err(format!(
                    "{at}: expected {type_name}, got {}",
                    value.type_name()
                ))
            }
        },
        other => Err(format!(
            "{at}: schema node must be an object or type name, got {}",
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, MetaValue)]) -> MetaValue {
        MetaValue::Object(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn json_round_trip() {
        let doc = obj(&[
            ("host", MetaValue::String("db01".into())),
            ("cores", MetaValue::Int(8)),
            ("online", MetaValue::Bool(true)),
        ]);
        let json = doc.to_json();
        let back = MetaValue::from_json(&json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn emptiness() {
        assert!(MetaValue::Null.is_empty());
        assert!(MetaValue::empty_object().is_empty());
        assert!(MetaValue::String(String::new()).is_empty());
        assert!(!MetaValue::Int(0).is_empty());
        assert!(!MetaValue::String("x".into()).is_empty());
    }

    #[test]
    fn path_navigation() {
        let doc = obj(&[("net", obj(&[("ip", MetaValue::String("10.0.0.1".into()))]))]);
        assert_eq!(
            doc.path("net.ip").and_then(MetaValue::as_str),
            Some("10.0.0.1")
        );
        assert!(doc.path("net.mac").is_none());
        assert!(doc.path("cpu.cores").is_none());
    }

    #[test]
    fn schema_accepts_conforming_doc() {
        let schema = obj(&[
            ("host", MetaValue::String("string".into())),
            ("cores", MetaValue::String("int".into())),
        ]);
        let doc = obj(&[
            ("host", MetaValue::String("db01".into())),
            ("cores", MetaValue::Int(8)),
            ("extra", MetaValue::Bool(true)),
        ]);
        assert!(validate_meta(&doc, &schema).is_ok());
    }

    #[test]
    fn schema_rejects_missing_field() {
        let schema = obj(&[("host", MetaValue::String("string".into()))]);
        let doc = obj(&[("cores", MetaValue::Int(8))]);
        let err = validate_meta(&doc, &schema).unwrap_err();
        assert!(err.contains("required field missing"), "{err}");
    }

    #[test]
    fn schema_rejects_wrong_type() {
        let schema = obj(&[("cores", MetaValue::String("int".into()))]);
        let doc = obj(&[("cores", MetaValue::String("eight".into()))]);
        let err = validate_meta(&doc, &schema).unwrap_err();
        assert!(err.contains("expected int"), "{err}");
    }

    #[test]
    fn schema_nested_objects() {
        let schema = obj(&[("net", obj(&[("ip", MetaValue::String("string".into()))]))]);
        let good = obj(&[("net", obj(&[("ip", MetaValue::String("10.0.0.1".into()))]))]);
        let bad = obj(&[("net", MetaValue::String("10.0.0.1".into()))]);
        assert!(validate_meta(&good, &schema).is_ok());
        assert!(validate_meta(&bad, &schema).is_err());
    }

    #[test]
    fn int_accepted_where_float_expected() {
        let schema = obj(&[("load", MetaValue::String("float".into()))]);
        let doc = obj(&[("load", MetaValue::Int(1))]);
        assert!(validate_meta(&doc, &schema).is_ok());
    }

    #[test]
    fn from_serde_json() {
        let v: serde_json::Value = serde_json::json!({"a": 1, "b": [true, "x"]});
        let m: MetaValue = v.into();
        assert_eq!(m.path("a"), Some(&MetaValue::Int(1)));
        match m.get("b") {
            Some(MetaValue::Array(items)) => assert_eq!(items.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
