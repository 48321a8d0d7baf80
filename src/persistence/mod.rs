//! Persistence capabilities for conversation threads.
//!
//! The agency never writes to durable storage itself. Callers supply a
//! [`ThreadPersistence`] implementation (or two closures via
//! [`CallbackPersistence`]) that loads and saves a conversation's threads.

pub mod hooks;

pub use hooks::PersistenceHooks;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgencyError;
use crate::types::{ChannelKey, ThreadItem};

/// Persisted form of one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadData {
    pub items: Vec<ThreadItem>,
}

impl ThreadData {
    pub fn new(items: Vec<ThreadItem>) -> Self {
        Self { items }
    }
}

/// Threads of one conversation, keyed by channel.
pub type ThreadMap = BTreeMap<ChannelKey, ThreadData>;

/// Load/save capability supplied by the embedding application.
#[async_trait]
pub trait ThreadPersistence: Send + Sync {
    /// Load previously saved threads, or `None` for an unknown conversation.
    async fn load(&self, conversation_id: &str) -> Result<Option<ThreadMap>, AgencyError>;

    /// Save threads for a conversation.
    ///
    /// `threads` may be a subset of the conversation (only the channels a run
    /// touched); implementations merge by channel key.
    async fn save(&self, conversation_id: &str, threads: ThreadMap) -> Result<(), AgencyError>;
}

/// Async load callback.
pub type LoadThreadsFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<Option<ThreadMap>, AgencyError>> + Send>>
        + Send
        + Sync,
>;

/// Async save callback.
pub type SaveThreadsFn = Arc<
    dyn Fn(String, ThreadMap) -> Pin<Box<dyn Future<Output = Result<(), AgencyError>> + Send>>
        + Send
        + Sync,
>;

/// Closure-based persistence.
#[derive(Clone)]
pub struct CallbackPersistence {
    load: LoadThreadsFn,
    save: SaveThreadsFn,
}

impl CallbackPersistence {
    pub fn new<L, LFut, S, SFut>(load: L, save: S) -> Self
    where
        L: Fn(String) -> LFut + Send + Sync + 'static,
        LFut: Future<Output = Result<Option<ThreadMap>, AgencyError>> + Send + 'static,
        S: Fn(String, ThreadMap) -> SFut + Send + Sync + 'static,
        SFut: Future<Output = Result<(), AgencyError>> + Send + 'static,
    {
        Self {
            load: Arc::new(move |id| Box::pin(load(id))),
            save: Arc::new(move |id, threads| Box::pin(save(id, threads))),
        }
    }
}

impl std::fmt::Debug for CallbackPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPersistence").finish_non_exhaustive()
    }
}

#[async_trait]
impl ThreadPersistence for CallbackPersistence {
    async fn load(&self, conversation_id: &str) -> Result<Option<ThreadMap>, AgencyError> {
        (self.load)(conversation_id.to_string()).await
    }

    async fn save(&self, conversation_id: &str, threads: ThreadMap) -> Result<(), AgencyError> {
        (self.save)(conversation_id.to_string(), threads).await
    }
}

/// Process-local persistence. Not durable; meant for tests and demos.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    conversations: RwLock<HashMap<String, ThreadMap>>,
    saves: AtomicUsize,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation as if it had been saved earlier.
    pub fn insert(&self, conversation_id: impl Into<String>, threads: ThreadMap) {
        self.conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation_id.into(), threads);
    }

    /// Current stored state of a conversation.
    pub fn stored(&self, conversation_id: &str) -> Option<ThreadMap> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThreadPersistence for InMemoryPersistence {
    async fn load(&self, conversation_id: &str) -> Result<Option<ThreadMap>, AgencyError> {
        Ok(self.stored(conversation_id))
    }

    async fn save(&self, conversation_id: &str, threads: ThreadMap) -> Result<(), AgencyError> {
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .extend(threads);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
