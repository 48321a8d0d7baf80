//! Error types for the agency runtime.

pub mod unified;

pub use unified::{ErrorDetails, ErrorKind, Propagation};

use thiserror::Error;

/// Primary error type for all agency operations.
#[derive(Error, Debug)]
pub enum AgencyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid entry point: agent '{agent}' is not reachable from outside the agency")]
    InvalidEntryPoint { agent: String },

    #[error("Recursion limit reached: depth {depth} exceeds maximum of {max_depth}")]
    RecursionLimit { depth: usize, max_depth: usize },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Runner error for agent '{agent}': {message}")]
    Runner { agent: String, message: String },

    #[error("Run canceled")]
    Canceled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgencyError {
    /// Create a persistence error without an underlying source.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    /// Create a persistence error wrapping the backend failure.
    pub fn persistence_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a runner error for the named agent.
    pub fn runner(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runner {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::InvalidEntryPoint { .. } => ErrorKind::InvalidEntryPoint,
            Self::RecursionLimit { .. } => ErrorKind::RecursionLimit,
            Self::ToolExecution { .. } => ErrorKind::ToolExecution,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Runner { .. } => ErrorKind::Runner,
            Self::Canceled => ErrorKind::Canceled,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Errors no policy may downgrade: they abort the whole external call.
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration
                | ErrorKind::InvalidEntryPoint
                | ErrorKind::RecursionLimit
                | ErrorKind::Canceled
        )
    }

    /// Default propagation, before any configured escalation.
    pub fn propagation(&self) -> Propagation {
        if self.is_always_fatal() {
            Propagation::Fatal
        } else {
            Propagation::Recoverable
        }
    }

    /// Structured payload for callers and the event stream.
    pub fn details(&self) -> ErrorDetails {
        ErrorDetails::new(self.kind(), self.to_string())
    }
}

impl From<toml::de::Error> for AgencyError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(format!("invalid TOML: {err}"))
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgencyError>;
