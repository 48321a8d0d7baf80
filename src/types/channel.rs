//! Channel keys identifying one isolated conversation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AgencyError;

/// Sender name used for messages arriving from outside the agency.
pub const EXTERNAL_CALLER: &str = "user";

const SEPARATOR: &str = "->";

/// Directed (sender, receiver) pair.
///
/// Serializes as `"sender->receiver"` so thread maps can be keyed by it in
/// JSON and TOML.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ChannelKey {
    sender: String,
    receiver: String,
}

impl ChannelKey {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
        }
    }

    /// Channel between the external caller and an entry agent.
    pub fn external(entry_agent: impl Into<String>) -> Self {
        Self::new(EXTERNAL_CALLER, entry_agent)
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn is_external(&self) -> bool {
        self.sender == EXTERNAL_CALLER
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.sender, self.receiver)
    }
}

impl FromStr for ChannelKey {
    type Err = AgencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sender, receiver) = s.split_once(SEPARATOR).ok_or_else(|| {
            AgencyError::InvalidArgument(format!("channel key '{s}' is missing '{SEPARATOR}'"))
        })?;
        if sender.is_empty() || receiver.is_empty() || receiver.contains(SEPARATOR) {
            return Err(AgencyError::InvalidArgument(format!(
                "malformed channel key '{s}'"
            )));
        }
        Ok(Self::new(sender, receiver))
    }
}

impl From<ChannelKey> for String {
    fn from(key: ChannelKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ChannelKey {
    type Error = AgencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Whether `name` can appear inside a channel key.
///
/// Surrounding whitespace is rejected so keys survive a persisted round trip.
pub(crate) fn is_valid_participant_name(name: &str) -> bool {
    !name.is_empty() && name == name.trim() && !name.contains(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_form() {
        let key: ChannelKey = "ceo->dev".parse().expect("parse");
        assert_eq!(key, ChannelKey::new("ceo", "dev"));
        assert_eq!(key.to_string(), "ceo->dev");
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("ceo".parse::<ChannelKey>().is_err());
        assert!("->dev".parse::<ChannelKey>().is_err());
        assert!("a->b->c".parse::<ChannelKey>().is_err());
    }

    #[test]
    fn parsing_keeps_names_verbatim() {
        let key: ChannelKey = "user->ceo ".parse().expect("parse");
        assert_eq!(key.receiver(), "ceo ");
        assert_eq!(key.to_string(), "user->ceo ");
    }

    #[test]
    fn participant_names_reject_surrounding_whitespace() {
        assert!(is_valid_participant_name("QA Lead"));
        assert!(!is_valid_participant_name("ceo "));
        assert!(!is_valid_participant_name(" ceo"));
        assert!(!is_valid_participant_name("   "));
        assert!(!is_valid_participant_name("a->b"));
    }

    #[test]
    fn external_channel_uses_reserved_sender() {
        let key = ChannelKey::external("ceo");
        assert!(key.is_external());
        assert_eq!(key.sender(), EXTERNAL_CALLER);
    }
}
