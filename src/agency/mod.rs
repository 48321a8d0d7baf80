//! The agency façade: build a permissioned graph of agents once, then drive
//! external calls through it.

pub(crate) mod execution;
pub mod stream;

pub use stream::AgencyStream;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bon::Builder;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::execution::run_agent;
use crate::agent::{Agent, AgentRegistry};
use crate::config::AgencyConfig;
use crate::context::SharedRunContext;
use crate::error::AgencyError;
use crate::graph::{CommunicationGraph, Edge};
use crate::persistence::{PersistenceHooks, ThreadPersistence};
use crate::runner::{AgencyEventSink, EventEmitter, Runner};
use crate::thread::ThreadStore;
use crate::tools::{SendMessageTool, Tool};
use crate::types::channel::is_valid_participant_name;
use crate::types::{ChannelKey, FinalOutput, ThreadItem, EXTERNAL_CALLER};

/// Per-call options.
#[derive(Debug, Clone, Default, Builder)]
pub struct RunOptions {
    /// Appended to the entry agent's instructions for this call only.
    #[builder(into)]
    pub additional_instructions: Option<String>,
    /// Seed entries for the shared user-data map.
    #[builder(default)]
    pub context: HashMap<String, Value>,
    /// Cancels the call when triggered.
    pub cancellation: Option<CancellationToken>,
}

struct AgencyInner {
    graph: CommunicationGraph,
    agents: Arc<AgentRegistry>,
    store: Arc<ThreadStore>,
    runner: Arc<dyn Runner>,
    config: Arc<AgencyConfig>,
    hooks: PersistenceHooks,
}

/// A built, immutable set of agents and the edges between them.
///
/// Cloning is cheap; clones share threads and configuration.
#[derive(Clone)]
pub struct Agency {
    inner: Arc<AgencyInner>,
}

impl std::fmt::Debug for Agency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agency")
            .field("agents", &self.inner.agents.names())
            .field("edges", &self.inner.graph.edges())
            .field("entry_points", self.inner.graph.entry_points())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Inputs of one external call.
struct Call {
    message: String,
    entry_agent: String,
    conversation_id: String,
    options: RunOptions,
}

impl Agency {
    pub fn builder() -> AgencyBuilder {
        AgencyBuilder::default()
    }

    pub fn graph(&self) -> &CommunicationGraph {
        &self.inner.graph
    }

    pub fn agent(&self, name: &str) -> Option<&Arc<Agent>> {
        self.inner.agents.get(name)
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.inner.agents
    }

    pub fn thread_store(&self) -> &Arc<ThreadStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &AgencyConfig {
        &self.inner.config
    }

    /// Run one external call to completion.
    ///
    /// The message is appended to the `user -> entry_agent` thread and the
    /// entry agent is run against that thread. Calls on the same
    /// conversation id are serialized; different conversations run
    /// concurrently.
    pub async fn get_response(
        &self,
        message: impl Into<String>,
        entry_agent: &str,
        conversation_id: &str,
        options: Option<RunOptions>,
    ) -> Result<FinalOutput, AgencyError> {
        let call = self.prepare(message.into(), entry_agent, conversation_id, options)?;
        let cancel = call.options.cancellation.clone().unwrap_or_else(CancellationToken::new);
        let events = Arc::new(EventEmitter::new(Uuid::new_v4(), None));
        run_call(self.inner.clone(), call, events, cancel).await
    }

    /// Like [`get_response`](Self::get_response) but reports progress to
    /// `sink` as the call runs.
    pub async fn get_response_with_events(
        &self,
        message: impl Into<String>,
        entry_agent: &str,
        conversation_id: &str,
        options: Option<RunOptions>,
        sink: AgencyEventSink,
    ) -> Result<FinalOutput, AgencyError> {
        let call = self.prepare(message.into(), entry_agent, conversation_id, options)?;
        let cancel = call.options.cancellation.clone().unwrap_or_else(CancellationToken::new);
        let events = Arc::new(EventEmitter::new(Uuid::new_v4(), Some(sink)));
        run_call(self.inner.clone(), call, events, cancel).await
    }

    /// Start an external call and observe it as a stream of events.
    ///
    /// Invalid input fails here, before anything runs. The stream ends with
    /// exactly one `done` or `error` event. Dropping it, or calling
    /// [`AgencyStream::cancel`], stops the run and releases the conversation.
    pub fn get_response_stream(
        &self,
        message: impl Into<String>,
        entry_agent: &str,
        conversation_id: &str,
        options: Option<RunOptions>,
    ) -> Result<AgencyStream, AgencyError> {
        let call = self.prepare(message.into(), entry_agent, conversation_id, options)?;
        let cancel = call.options.cancellation.clone().unwrap_or_else(CancellationToken::new);
        let inner = self.inner.clone();
        Ok(AgencyStream::spawn(cancel, move |events, cancel| {
            run_call(inner, call, events, cancel)
        }))
    }

    fn prepare(
        &self,
        message: String,
        entry_agent: &str,
        conversation_id: &str,
        options: Option<RunOptions>,
    ) -> Result<Call, AgencyError> {
        if !self.inner.graph.is_entry_point(entry_agent) {
            return Err(AgencyError::InvalidEntryPoint {
                agent: entry_agent.to_string(),
            });
        }
        if conversation_id.trim().is_empty() {
            return Err(AgencyError::InvalidArgument(
                "conversation id must not be empty".to_string(),
            ));
        }
        if message.trim().is_empty() {
            return Err(AgencyError::InvalidArgument("message must not be empty".to_string()));
        }
        Ok(Call {
            message,
            entry_agent: entry_agent.to_string(),
            conversation_id: conversation_id.to_string(),
            options: options.unwrap_or_default(),
        })
    }
}

async fn run_call(
    inner: Arc<AgencyInner>,
    call: Call,
    events: Arc<EventEmitter>,
    cancel: CancellationToken,
) -> Result<FinalOutput, AgencyError> {
    let _call_lock = tokio::select! {
        _ = cancel.cancelled() => return Err(AgencyError::Canceled),
        guard = inner.store.lock_conversation(&call.conversation_id) => guard,
    };

    let ctx = SharedRunContext::builder(&call.conversation_id)
        .store(inner.store.clone())
        .agents(inner.agents.clone())
        .runner(inner.runner.clone())
        .config(inner.config.clone())
        .user_data(call.options.context.clone())
        .events(events)
        .cancellation(cancel)
        .build();
    tracing::debug!(
        run_id = %ctx.run_id(),
        conversation_id = %call.conversation_id,
        agent = %call.entry_agent,
        "external call started"
    );

    inner.hooks.before_run(&ctx).await?;
    let outcome = respond(&ctx, &call).await;
    let saved = inner.hooks.after_run(&ctx, &outcome).await;

    match &outcome {
        Ok(_) => tracing::debug!(
            run_id = %ctx.run_id(),
            conversation_id = %call.conversation_id,
            new_items = ctx.new_items().len(),
            "external call finished"
        ),
        Err(err) => tracing::debug!(
            run_id = %ctx.run_id(),
            conversation_id = %call.conversation_id,
            error = %err,
            "external call failed"
        ),
    }
    let output = outcome?;
    saved?;
    Ok(output)
}

async fn respond(ctx: &SharedRunContext, call: &Call) -> Result<FinalOutput, AgencyError> {
    if ctx.is_cancelled() {
        return Err(AgencyError::Canceled);
    }
    let channel = ChannelKey::external(&call.entry_agent);
    ctx.add_items(&channel, vec![ThreadItem::user(&call.message)]).await;

    let output = run_agent(
        ctx,
        &call.entry_agent,
        &channel,
        call.options.additional_instructions.as_deref(),
    )
    .await?;

    Ok(FinalOutput {
        conversation_id: call.conversation_id.clone(),
        agent: call.entry_agent.clone(),
        final_output: output.final_output,
        new_items: ctx.new_items(),
    })
}

/// Collects agents, edges and entry points, then validates them all at once
/// in [`build`](Self::build).
#[derive(Default)]
pub struct AgencyBuilder {
    agents: Vec<Agent>,
    edges: Vec<Edge>,
    flows: Vec<String>,
    entry_points: Vec<String>,
    runner: Option<Arc<dyn Runner>>,
    persistence: Option<Arc<dyn ThreadPersistence>>,
    config: AgencyConfig,
}

impl std::fmt::Debug for AgencyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgencyBuilder")
            .field("agents", &self.agents.iter().map(Agent::name).collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("flows", &self.flows)
            .field("entry_points", &self.entry_points)
            .finish_non_exhaustive()
    }
}

impl AgencyBuilder {
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    /// Add an agent and make it reachable from outside.
    pub fn entry_agent(mut self, agent: Agent) -> Self {
        self.entry_points.push(agent.name().to_string());
        self.agents.push(agent);
        self
    }

    pub fn entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_points.push(name.into());
        self
    }

    /// Allow `sender` to message `receiver`.
    pub fn edge(mut self, sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        self.edges.push(Edge::new(sender, receiver));
        self
    }

    /// Allow a flow written as `"sender > receiver"`.
    pub fn flow(mut self, flow: impl Into<String>) -> Self {
        self.flows.push(flow.into());
        self
    }

    pub fn runner(self, runner: impl Runner + 'static) -> Self {
        self.shared_runner(Arc::new(runner))
    }

    pub fn shared_runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn ThreadPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn config(mut self, config: AgencyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn shared_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.shared_instructions = Some(instructions.into());
        self
    }

    /// Validate everything and freeze the agency.
    pub fn build(self) -> Result<Agency, AgencyError> {
        self.config.validate()?;
        let runner = self
            .runner
            .ok_or_else(|| AgencyError::Configuration("a runner is required".to_string()))?;

        let mut seen = HashSet::new();
        for agent in &self.agents {
            let name = agent.name();
            if !is_valid_participant_name(name) {
                return Err(AgencyError::Configuration(format!("invalid agent name '{name}'")));
            }
            if name == EXTERNAL_CALLER {
                return Err(AgencyError::Configuration(format!(
                    "agent name '{EXTERNAL_CALLER}' is reserved for the external caller"
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(AgencyError::Configuration(format!("agent '{name}' is declared more than once")));
            }
        }

        let mut edges = self.edges;
        for flow in &self.flows {
            edges.push(flow.parse()?);
        }
        let graph = CommunicationGraph::new(
            self.agents.iter().map(|agent| agent.name().to_string()),
            edges,
            self.entry_points,
        )?;

        let descriptions: BTreeMap<String, String> = self
            .agents
            .iter()
            .map(|agent| (agent.name().to_string(), agent.description().to_string()))
            .collect();
        let mut agents: BTreeMap<String, Agent> = self
            .agents
            .into_iter()
            .map(|agent| (agent.name().to_string(), agent))
            .collect();

        for edge in graph.edges() {
            let receiver_description = descriptions.get(&edge.receiver).map(String::as_str).unwrap_or("");
            let tool = SendMessageTool::new(&edge.sender, &edge.receiver, receiver_description);
            let sender = agents.get_mut(&edge.sender).ok_or_else(|| {
                AgencyError::Configuration(format!("edge '{edge}' references unknown agent '{}'", edge.sender))
            })?;
            if sender.tool(tool.name()).is_some() {
                return Err(AgencyError::Configuration(format!(
                    "tool '{}' on agent '{}' collides with the send_message tool for '{}'",
                    tool.name(),
                    edge.sender,
                    edge.receiver
                )));
            }
            sender.attach_send_message(&edge.receiver, Arc::new(tool));
        }

        for unreachable in graph.unreachable() {
            tracing::warn!(agent = unreachable, "agent is not reachable from any entry point");
        }

        let mut store = ThreadStore::new();
        if let Some(persistence) = self.persistence {
            store = store.with_persistence(persistence);
        }
        let store = Arc::new(store);
        tracing::debug!(
            agents = agents.len(),
            edges = graph.edges().len(),
            entry_points = graph.entry_points().len(),
            "agency built"
        );

        Ok(Agency {
            inner: Arc::new(AgencyInner {
                hooks: PersistenceHooks::new(store.clone()),
                agents: Arc::new(AgentRegistry::new(agents.into_values())),
                graph,
                store,
                runner,
                config: Arc::new(self.config),
            }),
        })
    }
}
