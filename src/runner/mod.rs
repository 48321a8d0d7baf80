//! The runner seam: the external capability that executes one agent turn.
//!
//! The agency never talks to a model itself. For every agent invocation it
//! builds a [`RunRequest`] (agent, composed instructions, channel history,
//! shared context) and awaits a [`Runner`]. Runners execute tool calls
//! through [`RunRequest::execute_tool`] so that `send_message` delegation,
//! error classification and event emission behave identically across
//! backends.

pub mod events;

pub use events::{AgencyEvent, AgencyEventPayload, AgencyEventSink, EventEmitter, RunId};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::agent::Agent;
use crate::context::SharedRunContext;
use crate::error::AgencyError;
use crate::tools::{Tool, ToolArguments, ToolExecutionContext};
use crate::types::{ChannelKey, ItemType, Role, ThreadItem, ToolCall, ToolResult};

/// Everything a runner needs to execute one agent on one channel.
#[derive(Clone)]
pub struct RunRequest {
    /// Id of this single agent invocation.
    pub invocation_id: Uuid,
    pub agent: Arc<Agent>,
    pub channel: ChannelKey,
    /// Shared, agent and per-call instructions joined in that order.
    pub instructions: String,
    /// Channel history, oldest first, already truncated to the history limit.
    pub history: Vec<ThreadItem>,
    pub context: SharedRunContext,
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("invocation_id", &self.invocation_id)
            .field("agent", &self.agent.name())
            .field("channel", &self.channel)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl RunRequest {
    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        self.agent.tools()
    }

    /// Text of the newest user message on the channel.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|item| item.role == Role::User && item.item_type == ItemType::Message)
            .map(|item| item.content.as_str())
    }

    /// Forward an incremental piece of assistant text to stream consumers.
    pub fn emit_text_delta(&self, text: impl Into<String>) {
        self.context.emit(AgencyEventPayload::MessageDelta {
            agent: self.agent.name().to_string(),
            text: text.into(),
        });
    }

    /// Execute one tool call requested by the model.
    ///
    /// Recoverable failures (unknown tool, bad arguments, a failed nested
    /// agent) come back as an error [`ToolResult`] for the model to handle.
    /// Fatal failures, as decided by the escalation policy, are returned as
    /// `Err` and must be propagated by the runner.
    pub async fn execute_tool(&self, call: &ToolCall) -> Result<ToolResult, AgencyError> {
        if self.context.is_cancelled() {
            return Err(AgencyError::Canceled);
        }
        let agent = self.agent.name().to_string();
        self.context.emit(AgencyEventPayload::ToolCallStarted {
            agent: agent.clone(),
            call: call.clone(),
        });

        let result = match self.agent.tool(&call.name) {
            None => {
                tracing::warn!(agent = %agent, tool = %call.name, "model requested unknown tool");
                ToolResult::error(&call.id, format!("Tool '{}' not found", call.name))
            }
            Some(tool) => {
                let args = ToolArguments::new(call.arguments.clone());
                let ctx = ToolExecutionContext::new(self.context.clone(), agent.clone())
                    .with_call(&call.id, &call.name);
                let outcome = match tool.parameters().validate(args.raw()) {
                    Ok(()) => tool.execute(&args, &ctx).await,
                    Err(err) => Err(err),
                };
                match outcome {
                    Ok(value) => ToolResult::success(&call.id, value),
                    Err(err) if self.context.config().escalation.is_fatal(&err) => {
                        tracing::debug!(
                            agent = %agent,
                            tool = %call.name,
                            error = %err,
                            "fatal tool error"
                        );
                        return Err(err);
                    }
                    Err(err) => {
                        tracing::warn!(
                            agent = %agent,
                            tool = %call.name,
                            error = %err,
                            "tool failed; returning error result to model"
                        );
                        ToolResult::error(&call.id, err.to_string())
                    }
                }
            }
        };

        self.context.emit(AgencyEventPayload::ToolCallCompleted {
            agent,
            call: call.clone(),
            result: result.clone(),
        });
        Ok(result)
    }
}

/// What a runner hands back after one agent invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    pub final_output: String,
    /// Intermediate items (tool calls, tool results, system events) to append
    /// to the channel before the final assistant message.
    pub new_items: Vec<ThreadItem>,
    pub tool_calls: Vec<ToolCall>,
}

impl RunOutput {
    pub fn text(final_output: impl Into<String>) -> Self {
        Self {
            final_output: final_output.into(),
            ..Default::default()
        }
    }

    /// Record an executed tool call and its result as thread items.
    pub fn record_tool_call(&mut self, call: &ToolCall, result: &ToolResult) {
        self.new_items.push(ThreadItem::tool_call(call));
        self.new_items.push(ThreadItem::tool_result(result));
        self.tool_calls.push(call.clone());
    }

    pub fn with_final_output(mut self, final_output: impl Into<String>) -> Self {
        self.final_output = final_output.into();
        self
    }
}

/// Executes agents against a conversation history.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, request: RunRequest) -> Result<RunOutput, AgencyError>;
}

type RunHandler =
    dyn Fn(RunRequest) -> Pin<Box<dyn Future<Output = Result<RunOutput, AgencyError>> + Send>> + Send + Sync;

/// Closure-based runner.
#[derive(Clone)]
pub struct FnRunner {
    handler: Arc<RunHandler>,
}

impl FnRunner {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(RunRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RunOutput, AgencyError>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |request| Box::pin(handler(request))),
        }
    }
}

impl std::fmt::Debug for FnRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRunner").finish_non_exhaustive()
    }
}

#[async_trait]
impl Runner for FnRunner {
    async fn run(&self, request: RunRequest) -> Result<RunOutput, AgencyError> {
        (self.handler)(request).await
    }
}
