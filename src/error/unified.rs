//! Error classification shared by the façade, tools and event stream.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Machine-readable error kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InvalidEntryPoint,
    RecursionLimit,
    ToolExecution,
    Persistence,
    InvalidArgument,
    Runner,
    Canceled,
    Serialization,
    Io,
}

/// How far an error is allowed to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Aborts the whole external call.
    Fatal,
    /// Caught at the nearest tool boundary and handed back to the calling agent.
    Recoverable,
}

/// Structured, user-visible error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetails {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
