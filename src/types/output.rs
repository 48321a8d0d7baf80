//! Results returned by the agency façade.

use serde::{Deserialize, Serialize};

use super::channel::ChannelKey;
use super::item::ThreadItem;

/// An item created during a call, tagged with the thread it landed in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewItem {
    pub channel: ChannelKey,
    pub item: ThreadItem,
}

/// Terminal result of one external call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalOutput {
    pub conversation_id: String,
    /// Entry agent that produced `final_output`.
    pub agent: String,
    pub final_output: String,
    /// Every item appended during the call, across all threads, in append order.
    pub new_items: Vec<NewItem>,
}

impl FinalOutput {
    /// Items that landed in one channel.
    pub fn items_for(&self, channel: &ChannelKey) -> Vec<&ThreadItem> {
        self.new_items
            .iter()
            .filter(|entry| &entry.channel == channel)
            .map(|entry| &entry.item)
            .collect()
    }
}
