//! Per-channel conversation threads and the store that owns them.

pub mod conversation;
pub mod store;

pub use conversation::ConversationThread;
pub use store::ThreadStore;
