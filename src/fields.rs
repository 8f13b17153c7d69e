//! Declarative request field tables.
//!
//! Both the login request and the config write request are raw JSON objects.
//! Each endpoint declares its fields once in a `&[FieldSchema]` table and decodes
//! through [`FieldData`], which checks types strictly and reports the first bad
//! field by name. A type mismatch is an error, never a silently skipped value.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Bool,
    /// Whole seconds: a non-negative integer or a string of digits.
    DurationSecond,
    /// string -> string map: a JSON object of strings, or `["k=v", ...]`.
    KvPairs,
}

impl FieldKind {
    fn expected(&self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::Bool => "a boolean",
            FieldKind::DurationSecond => "a non-negative number of seconds",
            FieldKind::KvPairs => "a map of string values",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<FieldDefault>,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Bool(bool),
    Seconds(u64),
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    String(String),
    Bool(bool),
    Seconds(u64),
    KvPairs(BTreeMap<String, String>),
}

/// Raw request data checked against a field table.
#[derive(Debug)]
pub struct FieldData<'a> {
    schema: &'a [FieldSchema],
    values: BTreeMap<&'static str, FieldValue>,
}

impl<'a> FieldData<'a> {
    /// Decode every declared field present in `raw`. Unknown keys are ignored;
    /// explicit `null` counts as absent.
    pub fn decode(schema: &'a [FieldSchema], raw: &Map<String, Value>) -> BridgeResult<Self> {
        let mut values = BTreeMap::new();
        for field in schema {
            match raw.get(field.name) {
                None | Some(Value::Null) => {}
                Some(v) => { values.insert(field.name, decode_value(field, v)?); }
            }
        }
        Ok(Self { schema, values })
    }

    fn field(&self, name: &str) -> BridgeResult<&FieldSchema> {
        self.schema
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| BridgeError::internal(format!("field {name} is not declared")))
    }

    /// Value explicitly provided by the caller.
    pub fn get_ok(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Provided value or the declared default.
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        if let Some(v) = self.values.get(name) { return Some(v.clone()); }
        let field = self.field(name).ok()?;
        field.default.map(|d| match d {
            FieldDefault::Bool(b) => FieldValue::Bool(b),
            FieldDefault::Seconds(s) => FieldValue::Seconds(s),
        })
    }

    /// Non-empty string; absent or empty is `MissingField`.
    pub fn require_str(&self, name: &str) -> BridgeResult<String> {
        match self.get(name) {
            Some(FieldValue::String(s)) if !s.is_empty() => Ok(s),
            Some(FieldValue::String(_)) | None => Err(BridgeError::missing_field(name)),
            Some(_) => Err(BridgeError::invalid_field(name, self.field(name)?.kind.expected())),
        }
    }

    /// Every field the table marks required must be present and, for strings, non-empty.
    pub fn check_required(&self) -> BridgeResult<()> {
        for field in self.schema.iter().filter(|f| f.required) {
            match self.get(field.name) {
                None => return Err(BridgeError::missing_field(field.name)),
                Some(FieldValue::String(s)) if s.is_empty() => return Err(BridgeError::missing_field(field.name)),
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) { Some(FieldValue::Bool(b)) => Some(b), _ => None }
    }
    pub fn opt_seconds(&self, name: &str) -> Option<u64> {
        match self.get(name) { Some(FieldValue::Seconds(s)) => Some(s), _ => None }
    }
    pub fn opt_kv(&self, name: &str) -> Option<BTreeMap<String, String>> {
        match self.get(name) { Some(FieldValue::KvPairs(m)) => Some(m), _ => None }
    }
}

fn decode_value(field: &FieldSchema, v: &Value) -> BridgeResult<FieldValue> {
    let bad = || BridgeError::invalid_field(field.name, field.kind.expected());
    match field.kind {
        FieldKind::String => v.as_str().map(|s| FieldValue::String(s.to_string())).ok_or_else(bad),
        FieldKind::Bool => match v {
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::String(s) if s == "true" => Ok(FieldValue::Bool(true)),
            Value::String(s) if s == "false" => Ok(FieldValue::Bool(false)),
            _ => Err(bad()),
        },
        FieldKind::DurationSecond => match v {
            Value::Number(n) => n.as_u64().map(FieldValue::Seconds).ok_or_else(bad),
            Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse::<u64>().map(FieldValue::Seconds).map_err(|_| bad())
            }
            _ => Err(bad()),
        },
        FieldKind::KvPairs => match v {
            Value::Object(obj) => {
                let mut out = BTreeMap::new();
                for (k, val) in obj {
                    let s = val.as_str().ok_or_else(bad)?;
                    out.insert(k.clone(), s.to_string());
                }
                Ok(FieldValue::KvPairs(out))
            }
            Value::Array(items) => {
                let mut out = BTreeMap::new();
                for item in items {
                    let pair = item.as_str().ok_or_else(bad)?;
                    let (k, val) = pair.split_once('=').ok_or_else(bad)?;
                    if k.is_empty() { return Err(bad()); }
                    out.insert(k.to_string(), val.to_string());
                }
                Ok(FieldValue::KvPairs(out))
            }
            _ => Err(bad()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    const SCHEMA: &[FieldSchema] = &[
        FieldSchema { name: "host", kind: FieldKind::String, required: true, default: None, description: "" },
        FieldSchema { name: "debug", kind: FieldKind::Bool, required: false, default: Some(FieldDefault::Bool(false)), description: "" },
        FieldSchema { name: "ttl", kind: FieldKind::DurationSecond, required: false, default: Some(FieldDefault::Seconds(60)), description: "" },
        FieldSchema { name: "headers", kind: FieldKind::KvPairs, required: false, default: None, description: "" },
    ];

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn defaults_fill_absent_fields() {
        let data = FieldData::decode(SCHEMA, &obj(json!({"host": "h"}))).unwrap();
        assert_eq!(data.opt_bool("debug"), Some(false));
        assert_eq!(data.opt_seconds("ttl"), Some(60));
        assert!(data.get_ok("ttl").is_none());
        assert!(data.opt_kv("headers").is_none());
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let err = FieldData::decode(SCHEMA, &obj(json!({"host": 5}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
        assert!(err.message().starts_with("host "));

        let err = FieldData::decode(SCHEMA, &obj(json!({"ttl": -3}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
        let err = FieldData::decode(SCHEMA, &obj(json!({"debug": "yes"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
    }

    #[test]
    fn lenient_scalar_encodings() {
        let data = FieldData::decode(SCHEMA, &obj(json!({"debug": "true", "ttl": "120"}))).unwrap();
        assert_eq!(data.opt_bool("debug"), Some(true));
        assert_eq!(data.opt_seconds("ttl"), Some(120));
    }

    #[test]
    fn kv_pairs_from_object_or_list() {
        let a = FieldData::decode(SCHEMA, &obj(json!({"headers": {"X-A": "1"}}))).unwrap();
        let b = FieldData::decode(SCHEMA, &obj(json!({"headers": ["X-A=1"]}))).unwrap();
        assert_eq!(a.opt_kv("headers"), b.opt_kv("headers"));
        assert!(FieldData::decode(SCHEMA, &obj(json!({"headers": ["nokey"]}))).is_err());
    }

    #[test]
    fn required_and_empty_strings() {
        let data = FieldData::decode(SCHEMA, &obj(json!({"host": ""}))).unwrap();
        assert_eq!(data.check_required().unwrap_err().kind(), ErrorKind::MissingField);
        assert_eq!(data.require_str("host").unwrap_err().message(), "host is required");
        let data = FieldData::decode(SCHEMA, &obj(json!({"host": null}))).unwrap();
        assert!(data.get_ok("host").is_none());
    }
}
