//! Built-in delegation tool bound to one sender → receiver edge.

use async_trait::async_trait;
use serde_json::json;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::AgentToolParameters;
use crate::agency::execution::run_agent;
use crate::error::AgencyError;
use crate::runner::AgencyEventPayload;
use crate::types::{ChannelKey, ThreadItem};

const TOOL_PREFIX: &str = "send_message_to_";

/// Derive the tool name for messaging `receiver`.
///
/// ```
/// assert_eq!(agency::tools::send_message_tool_name("QA Lead"), "send_message_to_qa_lead");
/// ```
pub fn send_message_tool_name(receiver: &str) -> String {
    let suffix: String = receiver
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{TOOL_PREFIX}{suffix}")
}

/// Sends a message on the `(sender, receiver)` channel and runs the receiver
/// against that channel's history.
///
/// The receiver's final output is returned as the tool result. Failures of
/// the receiver come back as a recoverable [`AgencyError::ToolExecution`]
/// unless they are fatal under the escalation policy.
#[derive(Debug, Clone)]
pub struct SendMessageTool {
    sender: String,
    receiver: String,
    name: String,
    description: String,
    parameters: AgentToolParameters,
}

impl SendMessageTool {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, receiver_description: &str) -> Self {
        let receiver = receiver.into();
        let mut description = format!(
            "Send a message to agent '{receiver}' and wait for its reply. \
             The conversation with this agent is kept between calls."
        );
        if !receiver_description.is_empty() {
            description.push_str(&format!(" About {receiver}: {receiver_description}"));
        }
        Self {
            sender: sender.into(),
            name: send_message_tool_name(&receiver),
            receiver,
            description,
            parameters: AgentToolParameters::object()
                .string("message", "Message for the receiving agent", true)
                .string(
                    "additional_instructions",
                    "Extra instructions for the receiving agent for this message only",
                    false,
                )
                .build(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// Channel this tool writes to.
    pub fn channel(&self) -> ChannelKey {
        ChannelKey::new(&self.sender, &self.receiver)
    }

    fn wrap_failure(&self, err: AgencyError, ctx: &ToolExecutionContext) -> AgencyError {
        if ctx.run.config().escalation.is_fatal(&err) {
            return err;
        }
        AgencyError::tool(&self.name, format!("agent '{}' failed: {err}", self.receiver))
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, AgencyError> {
        let message = args.get_non_empty_str("message")?;
        let additional = args
            .get_str_opt("additional_instructions")
            .filter(|text| !text.trim().is_empty());
        if !ctx.run.agents().contains(&self.receiver) {
            return Err(AgencyError::Configuration(format!(
                "receiver '{}' is not registered",
                self.receiver
            )));
        }
        if ctx.run.is_cancelled() {
            return Err(AgencyError::Canceled);
        }

        let channel = self.channel();
        ctx.run
            .add_items(
                &channel,
                vec![ThreadItem::user(message)
                    .with_metadata("sender", self.sender.clone())
                    .with_metadata("receiver", self.receiver.clone())],
            )
            .await;

        let guard = ctx.run.enter()?;
        tracing::debug!(
            conversation_id = ctx.run.conversation_id(),
            channel = %channel,
            depth = guard.level(),
            "delegating to receiver"
        );
        ctx.run.emit(AgencyEventPayload::Handoff {
            from: self.sender.clone(),
            to: self.receiver.clone(),
            message: message.to_string(),
        });

        let output = run_agent(&ctx.run, &self.receiver, &channel, additional)
            .await
            .map_err(|err| self.wrap_failure(err, ctx))?;
        drop(guard);

        Ok(json!({
            "agent": self.receiver,
            "response": output.final_output,
        }))
    }
}
