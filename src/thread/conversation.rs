//! Append-only item log for one channel.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{ChannelKey, ThreadItem};

#[derive(Debug, Default)]
struct ThreadState {
    items: Vec<ThreadItem>,
    next_sequence: u64,
}

impl ThreadState {
    fn with_items(items: Vec<ThreadItem>) -> Self {
        let mut state = Self {
            items: Vec::with_capacity(items.len()),
            next_sequence: 1,
        };
        let ordered = items
            .windows(2)
            .all(|pair| pair[0].sequence < pair[1].sequence)
            && items.first().map_or(true, |item| item.sequence > 0);
        if ordered {
            state.next_sequence = items.last().map_or(1, |item| item.sequence + 1);
            state.items = items;
        } else {
            // Foreign data without usable sequences: renumber in given order.
            for mut item in items {
                item.sequence = state.next_sequence;
                state.next_sequence += 1;
                state.items.push(item);
            }
        }
        state
    }
}

/// Ordered, append-only log of items exchanged over one channel.
///
/// Items are never mutated or reordered once appended. Every read returns a
/// snapshot copy, so callers never observe a half-applied append.
#[derive(Debug)]
pub struct ConversationThread {
    channel: ChannelKey,
    state: Mutex<ThreadState>,
}

impl ConversationThread {
    pub fn new(channel: ChannelKey) -> Self {
        Self {
            channel,
            state: Mutex::new(ThreadState {
                items: Vec::new(),
                next_sequence: 1,
            }),
        }
    }

    /// Rebuild a thread from persisted items, preserving their order.
    pub fn from_items(channel: ChannelKey, items: Vec<ThreadItem>) -> Self {
        Self {
            channel,
            state: Mutex::new(ThreadState::with_items(items)),
        }
    }

    pub fn channel(&self) -> &ChannelKey {
        &self.channel
    }

    fn state(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `items` as one unit and return them with assigned sequences.
    pub fn append(&self, items: Vec<ThreadItem>) -> Vec<ThreadItem> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut state = self.state();
        let mut appended = Vec::with_capacity(items.len());
        for mut item in items {
            item.sequence = state.next_sequence;
            state.next_sequence += 1;
            item.metadata
                .entry("created_at")
                .or_insert_with(|| serde_json::Value::String(now.clone()));
            appended.push(item.clone());
            state.items.push(item);
        }
        appended
    }

    /// Snapshot of every item in insertion order.
    pub fn items(&self) -> Vec<ThreadItem> {
        self.state().items.clone()
    }

    /// The most recent `max_items` items in insertion order (all when `None`).
    pub fn history(&self, max_items: Option<usize>) -> Vec<ThreadItem> {
        let state = self.state();
        let start = max_items.map_or(0, |n| state.items.len().saturating_sub(n));
        state.items[start..].to_vec()
    }

    pub fn last(&self) -> Option<ThreadItem> {
        self.state().items.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    /// Drop all items. Sequence numbering restarts.
    pub fn clear(&self) {
        let mut state = self.state();
        state.items.clear();
        state.next_sequence = 1;
    }

    /// Replace the contents with persisted items.
    pub(crate) fn replace(&self, items: Vec<ThreadItem>) {
        *self.state() = ThreadState::with_items(items);
    }
}
