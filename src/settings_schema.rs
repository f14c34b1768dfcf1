//! Runtime object behind `new SettingGroup({...})` in settings-schema
//! modules.
//!
//! A group is an ordered map of setting fields. A field is usually an
//! object with `{type, label, value}` metadata but scalar fields are
//! accepted too. The group stays mutable at runtime (the settings update
//! endpoint patches it) and serializes back to module source text, which is
//! why schema modules bypass the bundler entirely.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::value::{Value, is_valid_identifier};

#[derive(Debug, Clone, PartialEq)]
pub struct SettingGroup {
    fields: IndexMap<String, Value>,
}

/// Patch payload for the settings update endpoint. Every mutation through
/// this must be followed by a cache invalidation for each placed instance
/// of the package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub key: String,
    pub value: serde_json::Value,
}

impl SettingGroup {
    pub fn new() -> Self {
        SettingGroup {
            fields: IndexMap::new(),
        }
    }

    /// Build from the single constructor argument. Anything but an object
    /// literal is invalid.
    pub fn from_value(arg: Value) -> Option<Self> {
        match arg {
            Value::Object(fields) => Some(SettingGroup { fields }),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The whole field, metadata included.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The current value of a setting: the `value` member of an object
    /// field, or the field itself when it is a scalar.
    pub fn value(&self, key: &str) -> Option<Value> {
        match self.fields.get(key)? {
            Value::Object(meta) => Some(meta.get("value").cloned().unwrap_or(Value::Null)),
            other => Some(other.clone()),
        }
    }

    /// Set the current value of an existing setting. Returns false when the
    /// key is unknown.
    pub fn set_value(&mut self, key: &str, value: Value) -> bool {
        match self.fields.get_mut(key) {
            Some(Value::Object(meta)) => {
                meta.insert("value".to_string(), value);
                true
            }
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Add a new setting or replace an existing one wholesale.
    pub fn upsert(&mut self, key: impl Into<String>, field: Value) {
        self.fields.insert(key.into(), field);
    }

    pub fn apply_patch(&mut self, patch: &SettingsPatch) -> bool {
        let value = json_to_value(&patch.value);
        if self.fields.contains_key(&patch.key) {
            self.set_value(&patch.key, value)
        } else {
            self.upsert(patch.key.clone(), value);
            true
        }
    }

    /// The constructor-argument object literal, for embedding in source.
    pub fn argument_source(&self, indent: usize) -> String {
        Value::Object(self.fields.clone()).serialize_source(indent)
    }

    /// Serialize the group back to a full module declaration under the
    /// given export name.
    pub fn serialize(&self, export_name: &str) -> String {
        debug_assert!(is_valid_identifier(export_name));
        format!(
            "export const {} = new SettingGroup({});\n",
            export_name,
            self.argument_source(0)
        )
    }
}

impl Default for SettingGroup {
    fn default() -> Self {
        Self::new()
    }
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        ),
    }
}
