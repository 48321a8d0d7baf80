//! Agents: named participants with instructions, tools and settings.

pub mod agent;
pub mod registry;

pub use agent::{Agent, AgentSettings};
pub use registry::AgentRegistry;
