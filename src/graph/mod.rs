//! Communication graph: which agent may message which, and who is reachable
//! from outside.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AgencyError;
use crate::types::ChannelKey;

/// Permission for `sender` to message `receiver`.
///
/// Parses from `"sender > receiver"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub sender: String,
    pub receiver: String,
}

impl Edge {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
        }
    }

    pub fn channel(&self) -> ChannelKey {
        ChannelKey::new(&self.sender, &self.receiver)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} > {}", self.sender, self.receiver)
    }
}

impl FromStr for Edge {
    type Err = AgencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sender, receiver) = s
            .split_once('>')
            .ok_or_else(|| AgencyError::Configuration(format!("edge '{s}' must look like 'a > b'")))?;
        let (sender, receiver) = (sender.trim(), receiver.trim());
        if sender.is_empty() || receiver.is_empty() || receiver.contains('>') {
            return Err(AgencyError::Configuration(format!("malformed edge '{s}'")));
        }
        Ok(Self::new(sender, receiver))
    }
}

impl<S: Into<String>, R: Into<String>> From<(S, R)> for Edge {
    fn from((sender, receiver): (S, R)) -> Self {
        Self::new(sender, receiver)
    }
}

/// Validated directed graph of allowed sender → receiver edges plus the set
/// of entry points.
///
/// Cycles are allowed; they are bounded at runtime by the depth guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationGraph {
    agents: BTreeSet<String>,
    edges: Vec<Edge>,
    edge_set: HashSet<Edge>,
    entry_points: BTreeSet<String>,
}

impl CommunicationGraph {
    /// Validate and build a graph.
    ///
    /// Fails when an edge names an unknown agent, targets its own sender, or
    /// is declared twice, or when an entry point is unknown or none is given.
    pub fn new<A, E, P>(agents: A, edges: E, entry_points: P) -> Result<Self, AgencyError>
    where
        A: IntoIterator,
        A::Item: Into<String>,
        E: IntoIterator<Item = Edge>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let agents: BTreeSet<String> = agents.into_iter().map(Into::into).collect();

        let mut ordered = Vec::new();
        let mut edge_set = HashSet::new();
        for edge in edges {
            for endpoint in [&edge.sender, &edge.receiver] {
                if !agents.contains(endpoint) {
                    return Err(AgencyError::Configuration(format!(
                        "edge '{edge}' references unknown agent '{endpoint}'"
                    )));
                }
            }
            if edge.sender == edge.receiver {
                return Err(AgencyError::Configuration(format!(
                    "edge '{edge}' connects an agent to itself"
                )));
            }
            if !edge_set.insert(edge.clone()) {
                return Err(AgencyError::Configuration(format!(
                    "edge '{edge}' is declared more than once"
                )));
            }
            ordered.push(edge);
        }

        let mut entries = BTreeSet::new();
        for entry in entry_points.into_iter().map(Into::into) {
            if !agents.contains(&entry) {
                return Err(AgencyError::Configuration(format!(
                    "entry point '{entry}' is not a known agent"
                )));
            }
            entries.insert(entry);
        }
        if entries.is_empty() {
            return Err(AgencyError::Configuration(
                "at least one entry point is required".to_string(),
            ));
        }

        Ok(Self {
            agents,
            edges: ordered,
            edge_set,
            entry_points: entries,
        })
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn agents(&self) -> &BTreeSet<String> {
        &self.agents
    }

    pub fn entry_points(&self) -> &BTreeSet<String> {
        &self.entry_points
    }

    pub fn is_entry_point(&self, agent: &str) -> bool {
        self.entry_points.contains(agent)
    }

    pub fn has_edge(&self, sender: &str, receiver: &str) -> bool {
        self.edge_set.contains(&Edge::new(sender, receiver))
    }

    /// Whether a channel corresponds to a declared edge or entry point.
    pub fn allows(&self, channel: &ChannelKey) -> bool {
        if channel.is_external() {
            return self.is_entry_point(channel.receiver());
        }
        self.has_edge(channel.sender(), channel.receiver())
    }

    pub fn receivers_of<'a>(&'a self, sender: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |edge| edge.sender == sender)
            .map(|edge| edge.receiver.as_str())
    }

    pub fn senders_of<'a>(&'a self, receiver: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |edge| edge.receiver == receiver)
            .map(|edge| edge.sender.as_str())
    }

    /// Agents reachable from any entry point by following edges.
    pub fn reachable(&self) -> BTreeSet<String> {
        let mut seen: BTreeSet<String> = self.entry_points.clone();
        let mut queue: VecDeque<&str> = self.entry_points.iter().map(String::as_str).collect();
        while let Some(current) = queue.pop_front() {
            for next in self.receivers_of(current) {
                if seen.insert(next.to_string()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Agents no external call can ever reach.
    pub fn unreachable(&self) -> Vec<&str> {
        let reachable = self.reachable();
        self.agents
            .iter()
            .filter(|agent| !reachable.contains(*agent))
            .map(String::as_str)
            .collect()
    }
}
