//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::AgencyError;

/// Arguments of one tool call as decoded by the runner.
///
/// Some backends deliver arguments as a JSON-encoded string rather than an
/// object; both forms are accepted.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        let value = match value {
            Value::String(raw) => decode_string_arguments(&raw).unwrap_or(Value::String(raw)),
            other => other,
        };
        Self { value }
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// Required string argument.
    pub fn get_str(&self, key: &str) -> Result<&str, AgencyError> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| AgencyError::InvalidArgument(format!("missing string argument: {key}")))
    }

    /// Required string argument that must contain more than whitespace.
    pub fn get_non_empty_str(&self, key: &str) -> Result<&str, AgencyError> {
        let value = self.get_str(key)?.trim();
        if value.is_empty() {
            return Err(AgencyError::InvalidArgument(format!(
                "argument '{key}' must not be empty"
            )));
        }
        Ok(value)
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_bool_opt(&self, key: &str) -> Option<bool> {
        self.value.get(key).and_then(Value::as_bool)
    }

    /// Deserialize all arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, AgencyError> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| AgencyError::InvalidArgument(format!("failed to deserialize arguments: {e}")))
    }
}

fn decode_string_arguments(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_object)
}
