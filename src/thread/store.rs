//! Thread store: one isolated thread per (conversation, channel).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::conversation::ConversationThread;
use crate::error::AgencyError;
use crate::persistence::{ThreadData, ThreadMap, ThreadPersistence};
use crate::types::{ChannelKey, ThreadItem};

#[derive(Debug, Default)]
struct ConversationThreads {
    threads: RwLock<BTreeMap<ChannelKey, Arc<ConversationThread>>>,
}

impl ConversationThreads {
    fn get(&self, key: &ChannelKey) -> Option<Arc<ConversationThread>> {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn get_or_create(&self, key: &ChannelKey) -> Arc<ConversationThread> {
        if let Some(thread) = self.get(key) {
            return thread;
        }
        self.threads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ConversationThread::new(key.clone())))
            .clone()
    }

    fn all(&self) -> Vec<Arc<ConversationThread>> {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Creates and retrieves conversation threads and mediates persistence.
///
/// Threads are partitioned first by conversation id, then by channel key;
/// no two keys ever share storage. Sync locks are held only for map lookups
/// and never across an await.
#[derive(Default)]
pub struct ThreadStore {
    conversations: RwLock<HashMap<String, Arc<ConversationThreads>>>,
    // Kept apart from `conversations` so clearing never swaps out a held lock.
    call_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    persistence: Option<Arc<dyn ThreadPersistence>>,
}

impl std::fmt::Debug for ThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStore")
            .field("conversations", &self.conversation_ids())
            .field("persistence", &self.persistence.as_ref().map(|_| ".."))
            .finish()
    }
}

impl ThreadStore {
    /// In-memory store without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn ThreadPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn persistence(&self) -> Option<&Arc<dyn ThreadPersistence>> {
        self.persistence.as_ref()
    }

    fn conversation(&self, conversation_id: &str) -> Arc<ConversationThreads> {
        if let Some(existing) = self
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
        {
            return existing.clone();
        }
        self.conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    fn existing_conversation(&self, conversation_id: &str) -> Option<Arc<ConversationThreads>> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
    }

    /// Get the thread for a channel, creating an empty one on first use.
    pub fn thread(&self, conversation_id: &str, key: &ChannelKey) -> Arc<ConversationThread> {
        self.conversation(conversation_id).get_or_create(key)
    }

    /// Get the thread for a channel without creating it.
    pub fn get_thread(&self, conversation_id: &str, key: &ChannelKey) -> Option<Arc<ConversationThread>> {
        self.existing_conversation(conversation_id)?.get(key)
    }

    /// Append items to a channel as one unit, in memory only.
    pub fn append(&self, conversation_id: &str, key: &ChannelKey, items: Vec<ThreadItem>) -> Vec<ThreadItem> {
        self.thread(conversation_id, key).append(items)
    }

    /// Append items and, when persistence is configured, save the whole
    /// conversation before returning.
    ///
    /// On a save failure the items stay appended in memory and the error is
    /// returned.
    pub async fn add_items(
        &self,
        conversation_id: &str,
        key: &ChannelKey,
        items: Vec<ThreadItem>,
    ) -> Result<Vec<ThreadItem>, AgencyError> {
        let appended = self.append(conversation_id, key, items);
        self.save_conversation(conversation_id).await?;
        Ok(appended)
    }

    /// Most recent items of a channel (empty if it does not exist yet).
    pub fn history(&self, conversation_id: &str, key: &ChannelKey, max_items: Option<usize>) -> Vec<ThreadItem> {
        self.get_thread(conversation_id, key)
            .map(|thread| thread.history(max_items))
            .unwrap_or_default()
    }

    /// Channels with a thread in this conversation.
    pub fn channels(&self, conversation_id: &str) -> Vec<ChannelKey> {
        self.existing_conversation(conversation_id)
            .map(|conv| {
                conv.threads
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .keys()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Every thread of a conversation in persisted form.
    pub fn snapshot(&self, conversation_id: &str) -> ThreadMap {
        self.existing_conversation(conversation_id)
            .map(|conv| {
                conv.all()
                    .into_iter()
                    .map(|thread| (thread.channel().clone(), ThreadData::new(thread.items())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Selected threads of a conversation in persisted form.
    pub fn snapshot_channels<'a>(
        &self,
        conversation_id: &str,
        keys: impl IntoIterator<Item = &'a ChannelKey>,
    ) -> ThreadMap {
        let Some(conv) = self.existing_conversation(conversation_id) else {
            return ThreadMap::new();
        };
        keys.into_iter()
            .filter_map(|key| {
                conv.get(key)
                    .map(|thread| (key.clone(), ThreadData::new(thread.items())))
            })
            .collect()
    }

    /// Replace the named threads with persisted data. Other threads are untouched.
    pub fn hydrate(&self, conversation_id: &str, threads: ThreadMap) {
        let conv = self.conversation(conversation_id);
        for (key, data) in threads {
            conv.get_or_create(&key).replace(data.items);
        }
    }

    /// Clear one thread. Returns whether it existed.
    pub fn clear_thread(&self, conversation_id: &str, key: &ChannelKey) -> bool {
        match self.get_thread(conversation_id, key) {
            Some(thread) => {
                thread.clear();
                true
            }
            None => false,
        }
    }

    /// Drop every thread of a conversation. Returns whether it existed.
    pub fn clear_conversation(&self, conversation_id: &str) -> bool {
        self.conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id)
            .is_some()
    }

    /// Serialize whole external calls on one conversation.
    ///
    /// The lock outlives [`clear_conversation`](Self::clear_conversation).
    pub async fn lock_conversation(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        self.call_lock(conversation_id).lock_owned().await
    }

    fn call_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self
            .call_locks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
        {
            return existing.clone();
        }
        self.call_locks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Load a conversation through the persistence backend and hydrate it.
    ///
    /// Returns whether any data was loaded.
    pub async fn load_conversation(&self, conversation_id: &str) -> Result<bool, AgencyError> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        match persistence.load(conversation_id).await? {
            Some(threads) => {
                tracing::debug!(
                    conversation_id,
                    threads = threads.len(),
                    "hydrating conversation threads"
                );
                self.hydrate(conversation_id, threads);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Save every thread of a conversation. No-op without persistence.
    pub async fn save_conversation(&self, conversation_id: &str) -> Result<(), AgencyError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        persistence
            .save(conversation_id, self.snapshot(conversation_id))
            .await
    }

    /// Save selected threads of a conversation. No-op without persistence.
    pub async fn save_channels<'a>(
        &self,
        conversation_id: &str,
        keys: impl IntoIterator<Item = &'a ChannelKey>,
    ) -> Result<(), AgencyError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        persistence
            .save(conversation_id, self.snapshot_channels(conversation_id, keys))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;

    #[test]
    fn thread_is_idempotent_per_key() {
        let store = ThreadStore::new();
        let key = ChannelKey::new("a", "b");
        let first = store.thread("conv", &key);
        let second = store.thread("conv", &key);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.channels("conv"), vec![key]);
    }

    #[test]
    fn conversations_do_not_share_threads() {
        let store = ThreadStore::new();
        let key = ChannelKey::new("a", "b");
        store.append("one", &key, vec![ThreadItem::user("hi")]);
        assert!(store.history("two", &key, None).is_empty());
        assert_eq!(store.history("one", &key, None).len(), 1);
    }

    #[test]
    fn clearing_one_thread_leaves_others() {
        let store = ThreadStore::new();
        let ab = ChannelKey::new("a", "b");
        let ac = ChannelKey::new("a", "c");
        store.append("conv", &ab, vec![ThreadItem::user("1")]);
        store.append("conv", &ac, vec![ThreadItem::user("2")]);

        assert!(store.clear_thread("conv", &ab));
        assert!(store.history("conv", &ab, None).is_empty());
        assert_eq!(store.history("conv", &ac, None).len(), 1);
        assert!(!store.clear_thread("conv", &ChannelKey::new("x", "y")));
    }

    #[tokio::test]
    async fn add_items_saves_full_conversation() {
        let backend = Arc::new(InMemoryPersistence::new());
        let store = ThreadStore::new().with_persistence(backend.clone());
        let ab = ChannelKey::new("a", "b");
        let ac = ChannelKey::new("a", "c");
        store.append("conv", &ab, vec![ThreadItem::user("1")]);

        store
            .add_items("conv", &ac, vec![ThreadItem::user("2")])
            .await
            .expect("add items");

        let saved = backend.stored("conv").expect("saved");
        assert_eq!(saved.len(), 2);
        assert_eq!(backend.save_count(), 1);
    }

    #[tokio::test]
    async fn conversation_lock_is_exclusive() {
        let store = Arc::new(ThreadStore::new());
        let guard = store.lock_conversation("conv").await;
        let store_clone = store.clone();
        let waiter = tokio::spawn(async move {
            let _guard = store_clone.lock_conversation("conv").await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.expect("waiter");
    }
}
