//! Agency: permissioned multi-agent orchestration.
//!
//! A set of named agents is connected by a directed communication graph.
//! Every declared edge gives the sender a `send_message_to_<receiver>` tool;
//! calling it runs the receiver on its own isolated thread and returns the
//! receiver's answer as the tool result. The model-calling engine is supplied
//! as a [`Runner`](runner::Runner) and persistence as a
//! [`ThreadPersistence`](persistence::ThreadPersistence) backend.
//!
//! # Quick Start
//!
//! ```no_run
//! use agency::prelude::*;
//!
//! # async fn example() -> agency::error::Result<()> {
//! let runner = FnRunner::new(|request: RunRequest| async move {
//!     let reply = format!("{} heard: {:?}", request.agent_name(), request.latest_user_message());
//!     Ok(RunOutput::text(reply))
//! });
//!
//! let agency = Agency::builder()
//!     .entry_agent(Agent::new("ceo").with_instructions("Coordinate the team."))
//!     .agent(Agent::new("dev").with_instructions("Write the code."))
//!     .flow("ceo > dev")
//!     .runner(runner)
//!     .build()?;
//!
//! let output = agency.get_response("Build a CLI", "ceo", "conv-1", None).await?;
//! println!("{}", output.final_output);
//! # Ok(())
//! # }
//! ```

pub mod agency;
pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod persistence;
pub mod prelude;
pub mod runner;
pub mod thread;
pub mod tools;
pub mod types;

pub use agency::{Agency, AgencyBuilder, AgencyStream, RunOptions};
pub use error::{AgencyError, Result};
