//! Configuration (layered: code > env > TOML file > defaults).

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AgencyError, ErrorKind, Propagation};

/// Default bound on nested `send_message` calls within one external call.
pub const DEFAULT_MAX_DEPTH: usize = 25;

const MAX_DEPTH_ENV: &str = "AGENCY_MAX_DEPTH";
const HISTORY_LIMIT_ENV: &str = "AGENCY_HISTORY_LIMIT";
const SAVE_ON_APPEND_ENV: &str = "AGENCY_SAVE_ON_APPEND";
const ESCALATE_ENV: &str = "AGENCY_ESCALATE";
const SHARED_INSTRUCTIONS_ENV: &str = "AGENCY_SHARED_INSTRUCTIONS";

/// Which tool-boundary failures abort the whole call.
///
/// Recursion-limit, configuration and cancellation errors are always fatal;
/// the listed kinds are escalated on top of those.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    pub escalate: BTreeSet<ErrorKind>,
}

impl EscalationPolicy {
    pub fn new(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            escalate: kinds.into_iter().collect(),
        }
    }

    /// Resolve how an error raised inside a tool propagates.
    pub fn propagation(&self, err: &AgencyError) -> Propagation {
        if err.is_always_fatal() || self.escalate.contains(&err.kind()) {
            Propagation::Fatal
        } else {
            Propagation::Recoverable
        }
    }

    pub fn is_fatal(&self, err: &AgencyError) -> bool {
        self.propagation(err) == Propagation::Fatal
    }
}

/// Runtime configuration for an [`Agency`](crate::agency::Agency).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencyConfig {
    /// Maximum nesting of `send_message` calls.
    pub max_depth: usize,
    /// Most recent items handed to the runner per thread; `None` = all.
    pub history_limit: Option<usize>,
    /// Save the whole conversation after every append, not only after the run.
    pub save_on_append: bool,
    pub escalation: EscalationPolicy,
    /// Prepended to every agent's instructions.
    pub shared_instructions: Option<String>,
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            history_limit: None,
            save_on_append: true,
            escalation: EscalationPolicy::default(),
            shared_instructions: None,
        }
    }
}

impl AgencyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_save_on_append(mut self, enabled: bool) -> Self {
        self.save_on_append = enabled;
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_shared_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.shared_instructions = Some(instructions.into());
        self
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, AgencyError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AgencyError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden by `AGENCY_*` environment variables (and `.env`).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(MAX_DEPTH_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(value) if value > 0 => self.max_depth = value,
                _ => tracing::warn!(var = MAX_DEPTH_ENV, value = %raw, "ignoring invalid value"),
            }
        }
        if let Some(raw) = lookup(HISTORY_LIMIT_ENV) {
            let raw = raw.trim();
            if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
                self.history_limit = None;
            } else {
                match raw.parse::<usize>() {
                    Ok(value) => self.history_limit = Some(value),
                    Err(_) => {
                        tracing::warn!(var = HISTORY_LIMIT_ENV, value = %raw, "ignoring invalid value")
                    }
                }
            }
        }
        if let Some(raw) = lookup(SAVE_ON_APPEND_ENV) {
            match parse_bool(&raw) {
                Some(value) => self.save_on_append = value,
                None => tracing::warn!(var = SAVE_ON_APPEND_ENV, value = %raw, "ignoring invalid value"),
            }
        }
        if let Some(raw) = lookup(ESCALATE_ENV) {
            let mut kinds = BTreeSet::new();
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                match part.parse::<ErrorKind>() {
                    Ok(kind) => {
                        kinds.insert(kind);
                    }
                    Err(_) => tracing::warn!(var = ESCALATE_ENV, kind = %part, "ignoring unknown error kind"),
                }
            }
            self.escalation = EscalationPolicy { escalate: kinds };
        }
        if let Some(raw) = lookup(SHARED_INSTRUCTIONS_ENV) {
            if !raw.trim().is_empty() {
                self.shared_instructions = Some(raw);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), AgencyError> {
        if self.max_depth == 0 {
            return Err(AgencyError::Configuration(
                "max_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
