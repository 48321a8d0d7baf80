//! Run-scoped context shared by every tool invocation of one external call.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentRegistry;
use crate::config::AgencyConfig;
use crate::error::AgencyError;
use crate::runner::events::{AgencyEventPayload, EventEmitter, RunId};
use crate::runner::Runner;
use crate::thread::{ConversationThread, ThreadStore};
use crate::types::{ChannelKey, NewItem, ThreadItem};

struct RunScope {
    conversation_id: String,
    store: Arc<ThreadStore>,
    agents: Arc<AgentRegistry>,
    runner: Option<Arc<dyn Runner>>,
    config: Arc<AgencyConfig>,
    user_data: RwLock<HashMap<String, Value>>,
    depth: AtomicUsize,
    touched: Mutex<BTreeSet<ChannelKey>>,
    new_items: Mutex<Vec<NewItem>>,
    persistence_failures: Mutex<Vec<String>>,
    events: Arc<EventEmitter>,
    cancel: CancellationToken,
}

/// Shared state for one external call and every nested `send_message` call
/// it triggers.
///
/// Cloning is cheap and every clone observes the same state. The user-data
/// map is guarded only for memory safety: a `get` followed by a `set` is not
/// atomic, so tools needing read-modify-write consistency must serialize
/// their own access. Nothing here is persisted automatically.
#[derive(Clone)]
pub struct SharedRunContext {
    inner: Arc<RunScope>,
}

impl std::fmt::Debug for SharedRunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRunContext")
            .field("run_id", &self.run_id())
            .field("conversation_id", &self.inner.conversation_id)
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SharedRunContext`].
pub struct SharedRunContextBuilder {
    conversation_id: String,
    store: Option<Arc<ThreadStore>>,
    agents: Option<Arc<AgentRegistry>>,
    runner: Option<Arc<dyn Runner>>,
    config: Option<Arc<AgencyConfig>>,
    user_data: HashMap<String, Value>,
    events: Option<Arc<EventEmitter>>,
    cancel: Option<CancellationToken>,
}

impl SharedRunContextBuilder {
    pub fn store(mut self, store: Arc<ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn agents(mut self, agents: Arc<AgentRegistry>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn config(mut self, config: Arc<AgencyConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn user_data(mut self, data: HashMap<String, Value>) -> Self {
        self.user_data = data;
        self
    }

    pub fn events(mut self, events: Arc<EventEmitter>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> SharedRunContext {
        SharedRunContext {
            inner: Arc::new(RunScope {
                conversation_id: self.conversation_id,
                store: self.store.unwrap_or_default(),
                agents: self.agents.unwrap_or_default(),
                runner: self.runner,
                config: self.config.unwrap_or_default(),
                user_data: RwLock::new(self.user_data),
                depth: AtomicUsize::new(0),
                touched: Mutex::new(BTreeSet::new()),
                new_items: Mutex::new(Vec::new()),
                persistence_failures: Mutex::new(Vec::new()),
                events: self
                    .events
                    .unwrap_or_else(|| Arc::new(EventEmitter::new(Uuid::new_v4(), None))),
                cancel: self.cancel.unwrap_or_else(CancellationToken::new),
            }),
        }
    }
}

/// Depth level held by an in-flight `send_message` call.
///
/// Dropping the guard (normally, on error, or on cancellation) releases the
/// level.
#[derive(Debug)]
pub struct DepthGuard {
    scope: Arc<RunScope>,
    level: usize,
}

impl DepthGuard {
    pub fn level(&self) -> usize {
        self.level
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.scope.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for RunScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunScope")
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

impl SharedRunContext {
    pub fn builder(conversation_id: impl Into<String>) -> SharedRunContextBuilder {
        SharedRunContextBuilder {
            conversation_id: conversation_id.into(),
            store: None,
            agents: None,
            runner: None,
            config: None,
            user_data: HashMap::new(),
            events: None,
            cancel: None,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.inner.events.run_id()
    }

    pub fn conversation_id(&self) -> &str {
        &self.inner.conversation_id
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.inner.store
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.inner.agents
    }

    pub fn runner(&self) -> Option<&Arc<dyn Runner>> {
        self.inner.runner.as_ref()
    }

    pub fn config(&self) -> &AgencyConfig {
        &self.inner.config
    }

    // -- user data --

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .user_data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// Typed read; `Ok(None)` when the key is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AgencyError> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(AgencyError::from)
    }

    /// Store a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner
            .user_data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), AgencyError> {
        self.set(key, serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner
            .user_data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Snapshot of the whole user-data map.
    pub fn user_data(&self) -> HashMap<String, Value> {
        self.inner
            .user_data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // -- threads --

    pub fn thread(&self, channel: &ChannelKey) -> Arc<ConversationThread> {
        self.inner.store.thread(&self.inner.conversation_id, channel)
    }

    pub fn history(&self, channel: &ChannelKey, max_items: Option<usize>) -> Vec<ThreadItem> {
        self.inner
            .store
            .history(&self.inner.conversation_id, channel, max_items)
    }

    /// Append items to a channel of this conversation as one unit.
    ///
    /// The append is recorded as touching `channel`. When `save_on_append` is
    /// enabled the whole conversation is saved afterwards; a failed save is
    /// logged and remembered, and the in-memory items stay usable.
    pub async fn add_items(&self, channel: &ChannelKey, items: Vec<ThreadItem>) -> Vec<ThreadItem> {
        let scope = &self.inner;
        let appended = scope.store.append(&scope.conversation_id, channel, items);
        lock(&scope.touched).insert(channel.clone());
        lock(&scope.new_items).extend(appended.iter().cloned().map(|item| NewItem {
            channel: channel.clone(),
            item,
        }));

        if scope.config.save_on_append && scope.store.persistence().is_some() {
            if let Err(err) = scope.store.save_conversation(&scope.conversation_id).await {
                tracing::warn!(
                    conversation_id = %scope.conversation_id,
                    channel = %channel,
                    error = %err,
                    "save after append failed; continuing with in-memory state"
                );
                lock(&scope.persistence_failures).push(err.to_string());
            }
        }
        appended
    }

    /// Channels appended to during this call.
    pub fn touched_channels(&self) -> BTreeSet<ChannelKey> {
        lock(&self.inner.touched).clone()
    }

    /// Items appended during this call, in append order.
    pub fn new_items(&self) -> Vec<NewItem> {
        lock(&self.inner.new_items).clone()
    }

    /// Save failures recorded since the last successful full save.
    pub fn persistence_failures(&self) -> Vec<String> {
        lock(&self.inner.persistence_failures).clone()
    }

    pub(crate) fn clear_persistence_failures(&self) {
        lock(&self.inner.persistence_failures).clear();
    }

    // -- recursion --

    /// Number of `send_message` levels currently in flight.
    pub fn depth(&self) -> usize {
        self.inner.depth.load(Ordering::SeqCst)
    }

    /// Enter one nesting level, failing once `max_depth` levels are active.
    pub fn enter(&self) -> Result<DepthGuard, AgencyError> {
        let max_depth = self.inner.config.max_depth;
        let previous = self.inner.depth.fetch_add(1, Ordering::SeqCst);
        let guard = DepthGuard {
            scope: self.inner.clone(),
            level: previous + 1,
        };
        if previous >= max_depth {
            return Err(AgencyError::RecursionLimit {
                depth: guard.level,
                max_depth,
            });
        }
        Ok(guard)
    }

    // -- cancellation & events --

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn emit(&self, payload: AgencyEventPayload) {
        self.inner.events.emit(payload);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
