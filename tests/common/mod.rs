//! Shared test helpers and a scripted runner.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use agency::error::AgencyError;
use agency::runner::{RunOutput, RunRequest, Runner};
use agency::tools::{send_message_tool_name, Tool};
use agency::types::{ChannelKey, ThreadItem, ToolCall};

/// What an agent does when the scripted runner invokes it.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer with fixed text.
    Reply(String),
    /// Answer with the newest user message on the channel.
    Echo,
    /// Message another agent, then relay its answer.
    Delegate { to: String, message: String },
    /// Fail the run.
    Fail(String),
    /// Wait before answering.
    Slow { delay: Duration, reply: String },
    /// Stream the reply as text deltas before returning it.
    Stream(Vec<String>),
}

impl Behavior {
    pub fn reply(text: &str) -> Self {
        Self::Reply(text.to_string())
    }

    pub fn delegate(to: &str, message: &str) -> Self {
        Self::Delegate {
            to: to.to_string(),
            message: message.to_string(),
        }
    }
}

/// One recorded runner invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub agent: String,
    pub channel: ChannelKey,
    pub instructions: String,
    pub history: Vec<ThreadItem>,
    pub tools: Vec<String>,
    pub depth: usize,
}

/// Deterministic runner driven by a per-agent script.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, agent: &str, behavior: Behavior) -> Self {
        self.behaviors.lock().unwrap().insert(agent.to_string(), behavior);
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocations_of(&self, agent: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|inv| inv.agent == agent)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(&self, request: RunRequest) -> Result<RunOutput, AgencyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(Invocation {
            agent: request.agent_name().to_string(),
            channel: request.channel.clone(),
            instructions: request.instructions.clone(),
            history: request.history.clone(),
            tools: request.tools().iter().map(|t| t.name().to_string()).collect(),
            depth: request.context.depth(),
        });
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(request.agent_name())
            .cloned()
            .unwrap_or(Behavior::Echo);

        match behavior {
            Behavior::Reply(text) => Ok(RunOutput::text(text)),
            Behavior::Echo => Ok(RunOutput::text(
                request.latest_user_message().unwrap_or_default().to_string(),
            )),
            Behavior::Fail(message) => Err(AgencyError::runner(request.agent_name(), message)),
            Behavior::Slow { delay, reply } => {
                tokio::time::sleep(delay).await;
                Ok(RunOutput::text(reply))
            }
            Behavior::Stream(chunks) => {
                for chunk in &chunks {
                    request.emit_text_delta(chunk.clone());
                }
                Ok(RunOutput::text(chunks.concat()))
            }
            Behavior::Delegate { to, message } => {
                let call = ToolCall::new(
                    format!("call_{n}"),
                    send_message_tool_name(&to),
                    json!({ "message": message }),
                );
                let result = request.execute_tool(&call).await?;
                let mut output = RunOutput::default();
                output.record_tool_call(&call, &result);
                let text = if result.is_error {
                    format!("I couldn't reach agent {to}: {}", result.result["error"])
                } else {
                    result.result["response"].as_str().unwrap_or_default().to_string()
                };
                Ok(output.with_final_output(text))
            }
        }
    }
}
