//! Tool parameter schemas.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgencyError;

/// JSON Schema describing a tool's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentToolParameters {
    pub schema: serde_json::Value,
}

impl AgentToolParameters {
    pub fn from_schema(schema: serde_json::Value) -> Self {
        Self { schema }
    }

    /// Object schema with no properties.
    pub fn empty() -> Self {
        Self::object().build()
    }

    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    /// Names of the required properties.
    pub fn required(&self) -> Vec<&str> {
        self.schema["required"]
            .as_array()
            .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
            .unwrap_or_default()
    }

    /// Check call arguments against the top level of the schema: object
    /// shape, required properties and declared property types.
    pub fn validate(&self, args: &Value) -> Result<(), AgencyError> {
        if self.schema["type"] == "object" && !args.is_object() {
            return Err(AgencyError::InvalidArgument(format!(
                "expected an object, got {}",
                type_name(args)
            )));
        }
        let Some(fields) = args.as_object() else {
            return Ok(());
        };
        if let Some(missing) = self.required().into_iter().find(|name| !fields.contains_key(*name)) {
            return Err(AgencyError::InvalidArgument(format!(
                "missing required argument '{missing}'"
            )));
        }
        for (name, value) in fields {
            let Some(expected) = self.schema["properties"][name]["type"].as_str() else {
                continue;
            };
            if !has_type(value, expected) {
                return Err(AgencyError::InvalidArgument(format!(
                    "argument '{name}' should be {expected}, got {}",
                    type_name(value)
                )));
            }
        }
        Ok(())
    }
}

fn has_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Builder for object parameter schemas.
#[derive(Debug)]
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(mut self, name: impl Into<String>, schema: serde_json::Value, required: bool) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({ "type": "string", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({ "type": "boolean", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn build(self) -> AgentToolParameters {
        AgentToolParameters {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}
