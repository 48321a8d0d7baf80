//! Running one agent on one channel.

use uuid::Uuid;

use crate::agent::Agent;
use crate::context::SharedRunContext;
use crate::error::AgencyError;
use crate::runner::{RunOutput, RunRequest};
use crate::types::{ChannelKey, ThreadItem};

/// Run `agent_name` against the history of `channel` and append its output.
///
/// The runner's intermediate items and the final assistant message are
/// appended together as one unit once the runner returns. Nothing is
/// appended when the run fails or is canceled.
pub(crate) async fn run_agent(
    ctx: &SharedRunContext,
    agent_name: &str,
    channel: &ChannelKey,
    additional_instructions: Option<&str>,
) -> Result<RunOutput, AgencyError> {
    if ctx.is_cancelled() {
        return Err(AgencyError::Canceled);
    }
    let agent = ctx
        .agents()
        .get(agent_name)
        .cloned()
        .ok_or_else(|| AgencyError::Configuration(format!("unknown agent '{agent_name}'")))?;
    let runner = ctx
        .runner()
        .cloned()
        .ok_or_else(|| AgencyError::Configuration("no runner configured".to_string()))?;

    let history_limit = agent.settings().history_limit.or(ctx.config().history_limit);
    let request = RunRequest {
        invocation_id: Uuid::new_v4(),
        instructions: compose_instructions(
            ctx.config().shared_instructions.as_deref(),
            &agent,
            additional_instructions,
        ),
        history: ctx.history(channel, history_limit),
        channel: channel.clone(),
        context: ctx.clone(),
        agent,
    };
    tracing::debug!(
        conversation_id = ctx.conversation_id(),
        agent = agent_name,
        channel = %channel,
        depth = ctx.depth(),
        invocation_id = %request.invocation_id,
        history = request.history.len(),
        "invoking runner"
    );

    let output = tokio::select! {
        _ = ctx.cancellation().cancelled() => return Err(AgencyError::Canceled),
        result = runner.run(request) => result?,
    };
    if ctx.is_cancelled() {
        return Err(AgencyError::Canceled);
    }

    let mut items = output.new_items.clone();
    items.push(ThreadItem::assistant(&output.final_output).with_metadata("agent", agent_name));
    ctx.add_items(channel, items).await;
    tracing::debug!(
        conversation_id = ctx.conversation_id(),
        agent = agent_name,
        channel = %channel,
        tool_calls = output.tool_calls.len(),
        "runner finished"
    );
    Ok(output)
}

/// Shared instructions, agent instructions and per-call instructions, in
/// that order, skipping empty parts.
pub(crate) fn compose_instructions(
    shared: Option<&str>,
    agent: &Agent,
    additional: Option<&str>,
) -> String {
    [shared, Some(agent.instructions()), additional]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
