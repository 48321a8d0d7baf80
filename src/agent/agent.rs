//! Agent definition.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::tools::tool::Tool;

/// Execution settings forwarded to the runner untouched.
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize, PartialEq)]
pub struct AgentSettings {
    #[builder(into)]
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Overrides the agency-wide history limit for this agent.
    pub history_limit: Option<usize>,
    #[builder(default)]
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A named participant in an agency.
///
/// Agents are assembled with the `with_*` methods and handed to the
/// [`AgencyBuilder`](crate::agency::AgencyBuilder). Building the agency
/// attaches one `send_message` tool per outgoing edge and freezes the agent:
/// afterwards it is only shared as `Arc<Agent>`.
pub struct Agent {
    name: String,
    description: String,
    instructions: String,
    tools: Vec<Arc<dyn Tool>>,
    receivers: BTreeSet<String>,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instructions: String::new(),
            tools: Vec::new(),
            receivers: BTreeSet::new(),
            settings: AgentSettings::default(),
        }
    }

    /// Shown to senders in the `send_message` tool description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tool(self, tool: impl Tool + 'static) -> Self {
        self.with_shared_tool(Arc::new(tool))
    }

    /// Add a tool instance that may also be attached to other agents.
    pub fn with_shared_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Tools in registration order; `send_message` tools follow user tools.
    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    /// Agents this agent may message.
    pub fn receivers(&self) -> &BTreeSet<String> {
        &self.receivers
    }

    pub fn can_send_to(&self, receiver: &str) -> bool {
        self.receivers.contains(receiver)
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub(crate) fn attach_send_message(&mut self, receiver: &str, tool: Arc<dyn Tool>) {
        self.receivers.insert(receiver.to_string());
        self.tools.push(tool);
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("tools", &self.tool_names())
            .field("receivers", &self.receivers)
            .field("settings", &self.settings)
            .finish()
    }
}
