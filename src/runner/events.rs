//! Structured events emitted while an external call runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorDetails;
use crate::types::{FinalOutput, ToolCall, ToolResult};

/// Unique id of one external call.
pub type RunId = Uuid;

/// Event payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgencyEventPayload {
    /// Incremental assistant text reported by a runner.
    MessageDelta { agent: String, text: String },
    ToolCallStarted { agent: String, call: ToolCall },
    ToolCallCompleted { agent: String, call: ToolCall, result: ToolResult },
    /// Control passes from one agent to another through `send_message`.
    Handoff { from: String, to: String, message: String },
    /// The call failed; always the last event of a stream.
    Error { error: ErrorDetails },
    /// The call finished; always the last event of a stream.
    Done { output: FinalOutput },
}

impl AgencyEventPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

/// Envelope for streaming events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgencyEvent {
    pub run_id: RunId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: AgencyEventPayload,
}

/// Callback receiving events as they happen.
pub type AgencyEventSink = Arc<dyn Fn(AgencyEvent) + Send + Sync>;

/// Stamps payloads with run id and sequence number and forwards them.
pub struct EventEmitter {
    run_id: RunId,
    seq: AtomicU64,
    sink: Option<AgencyEventSink>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, sink: Option<AgencyEventSink>) -> Self {
        Self {
            run_id,
            seq: AtomicU64::new(1),
            sink,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Wrap a payload in an envelope, consuming the next sequence number.
    pub fn envelope(&self, payload: AgencyEventPayload) -> AgencyEvent {
        AgencyEvent {
            run_id: self.run_id,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn emit(&self, payload: AgencyEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        (sink)(self.envelope(payload));
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("run_id", &self.run_id)
            .field("seq", &self.seq)
            .field("sink", &self.sink.as_ref().map(|_| ".."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emitter_numbers_events_in_order() {
        let captured: Arc<Mutex<Vec<AgencyEvent>>> = Arc::default();
        let sink_events = captured.clone();
        let sink: AgencyEventSink = Arc::new(move |event| {
            sink_events.lock().expect("lock").push(event);
        });
        let emitter = EventEmitter::new(Uuid::new_v4(), Some(sink));

        emitter.emit(AgencyEventPayload::MessageDelta {
            agent: "ceo".into(),
            text: "hi".into(),
        });
        emitter.emit(AgencyEventPayload::Handoff {
            from: "ceo".into(),
            to: "dev".into(),
            message: "build".into(),
        });

        let seqs: Vec<u64> = captured.lock().expect("lock").iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let payload = AgencyEventPayload::Handoff {
            from: "a".into(),
            to: "b".into(),
            message: "m".into(),
        };
        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json["type"], "handoff");
        assert!(!payload.is_terminal());
    }
}
