//! Records are schema-less documents: an ordered map of field names to dynamically typed JSON values.
//! Stores produce them, builders reshape them, and the target stores persist them.

use std::fmt;
use std::hash::{Hash, Hasher};

pub use serde_json::Value;

use crate::error::{Error, Result};

/// Internal identifier field that document stores attach to every record.
pub const INTERNAL_ID_FIELD: &str = "_id";

/// A single document. Field order is preserved as inserted.
pub type Record = serde_json::Map<String, Value>;

/// KeyValue is a scalar value (string, number or bool) that identifies a logical entity across stores.
/// It can be used as a map key, two key values are equal when the underlying JSON values are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue(Value);

impl KeyValue {
    /// Returns the key value if the given value is a non-null scalar.
    pub fn new(value: Value) -> Option<Self> {
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(Self(value)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // equal serde_json values have identical textual forms, so hashing the text keeps Hash and Eq
        // consistent.
        std::mem::discriminant(&self.0).hash(state);
        self.0.to_string().hash(state);
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<Value> for KeyValue {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let text = value.to_string();
        Self::new(value).ok_or_else(|| Error::Key(format!("{text} is not a valid key value")))
    }
}

impl From<KeyValue> for Value {
    fn from(value: KeyValue) -> Self {
        value.0
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self(Value::from(value))
    }
}

/// Looks up a dotted path (`"a.b.0.c"`) in a record. Segments are object fields, or list indices when
/// the current value is a list. Returns `None` as soon as a segment can not be resolved.
pub fn lookup_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(list) => list.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Returns a copy of the record that only keeps the top-level fields referenced by the given dotted
/// paths, in record order.
pub fn retain_paths(record: &Record, paths: &[String]) -> Record {
    record
        .iter()
        .filter(|(field, _)| {
            paths
                .iter()
                .any(|path| path.split('.').next() == Some(field.as_str()))
        })
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}
