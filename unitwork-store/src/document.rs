//! Document model shared by all store adapters.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unitwork_exec::StoreError;

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document ID (unique within its collection)
    pub id: String,
    /// Document body (always a JSON object)
    pub body: Value,
    /// Version of the committed state this document was read from
    pub version: u64,
}

impl Document {
    /// Get a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Deserialize the body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| StoreError::Serialization(format!("{}: {}", self.id, e)))
    }
}

/// Reject bodies that are not JSON objects.
pub(crate) fn ensure_object(body: &Value) -> Result<(), StoreError> {
    if body.is_object() {
        Ok(())
    } else {
        Err(StoreError::Serialization(format!(
            "document body must be a JSON object, got {}",
            kind(body)
        )))
    }
}

/// Top-level field equality. `null` or `{}` matches everything.
pub(crate) fn matches_filter(body: &Value, filter: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(fields) => fields.iter().all(|(key, expected)| body.get(key) == Some(expected)),
        _ => false,
    }
}

/// Overwrite the top-level fields named in `patch`.
pub(crate) fn merge_patch(body: &mut Value, patch: &Value) -> Result<(), StoreError> {
    let Value::Object(fields) = patch else {
        return Err(StoreError::Serialization(format!(
            "update patch must be a JSON object, got {}",
            kind(patch)
        )));
    };
    let Value::Object(target) = body else {
        return Err(StoreError::Serialization("stored body is not a JSON object".to_string()));
    };

    for (key, value) in fields {
        target.insert(key.clone(), value.clone());
    }
    Ok(())
}

pub(crate) fn to_body<T: Serialize + ?Sized>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
