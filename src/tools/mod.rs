//! Tools callable by agents, including the built-in `send_message` tool.

pub mod arguments;
pub mod send_message;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use send_message::{send_message_tool_name, SendMessageTool};
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::{AgentToolParameters, ParameterBuilder};
