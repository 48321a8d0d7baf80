//! Thread items: the unit of conversation history.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// What a thread item records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemType {
    Message,
    ToolCall,
    ToolResult,
    SystemEvent,
}

/// A single entry in a conversation thread.
///
/// The serialized shape (`role`, `content`, `itemType`, `sequence`,
/// `metadata`) is the stable format handed to persistence callbacks.
/// `sequence` is assigned by the owning thread at append time; any value set
/// before appending is overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadItem {
    pub role: Role,
    pub content: String,
    pub item_type: ItemType,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ThreadItem {
    fn new(role: Role, item_type: ItemType, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            item_type,
            sequence: 0,
            metadata: Map::new(),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, ItemType::Message, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, ItemType::Message, text)
    }

    /// Create a system event (not produced by the model).
    pub fn system_event(text: impl Into<String>) -> Self {
        Self::new(Role::System, ItemType::SystemEvent, text)
    }

    /// Record a tool call requested by the model.
    pub fn tool_call(call: &ToolCall) -> Self {
        Self::new(Role::Assistant, ItemType::ToolCall, call.arguments.to_string())
            .with_metadata("tool_call_id", call.id.clone())
            .with_metadata("tool_name", call.name.clone())
    }

    /// Record the result of a tool call.
    pub fn tool_result(result: &ToolResult) -> Self {
        let content = match &result.result {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self::new(Role::Tool, ItemType::ToolResult, content)
            .with_metadata("tool_call_id", result.tool_call_id.clone())
            .with_metadata("is_error", result.is_error)
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Tool call id, for tool-call and tool-result items.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.metadata.get("tool_call_id").and_then(Value::as_str)
    }

    /// Whether this item records a failed tool call.
    pub fn is_error(&self) -> bool {
        self.metadata
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether this is a plain message (user or assistant text).
    pub fn is_message(&self) -> bool {
        self.item_type == ItemType::Message
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A tool execution result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, result: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result,
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }
}
