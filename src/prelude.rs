//! Convenience re-exports for common use.

pub use crate::agency::{Agency, AgencyBuilder, AgencyStream, RunOptions};
pub use crate::agent::{Agent, AgentSettings};
pub use crate::config::{AgencyConfig, EscalationPolicy};
pub use crate::context::SharedRunContext;
pub use crate::error::{AgencyError, ErrorKind, Result};
pub use crate::graph::{CommunicationGraph, Edge};
pub use crate::persistence::{CallbackPersistence, InMemoryPersistence, ThreadData, ThreadMap, ThreadPersistence};
pub use crate::runner::{AgencyEvent, AgencyEventPayload, FnRunner, RunOutput, RunRequest, Runner};
pub use crate::tools::{AgentTool, AgentToolParameters, Tool, ToolArguments, ToolExecutionContext};
pub use crate::types::{ChannelKey, FinalOutput, ItemType, Role, ThreadItem, ToolCall, ToolResult};
