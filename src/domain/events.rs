//! Ephemeral event frames for streaming subscribers
//!
//! Frames are produced by the runner while an execution progresses and are
//! never durably stored; a reconnecting client fetches status or summary
//! instead of replaying frames.

use crate::domain::identifiers::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind discriminator of an event frame
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[display("thinking")]
    Thinking,
    #[display("tool_call")]
    ToolCall,
    #[display("response_chunk")]
    ResponseChunk,
    #[display("case_started")]
    CaseStarted,
    #[display("case_finished")]
    CaseFinished,
    #[display("complete")]
    Complete,
}

/// One frame of an execution's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub execution_id: ExecutionId,
    /// Monotonic within the execution; subscribers renumber per connection
    pub sequence: u64,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl EventFrame {
    pub fn is_final(&self) -> bool {
        matches!(self.kind, EventKind::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventKind::CaseFinished).unwrap(),
            "\"case_finished\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::Complete).unwrap(),
            "\"complete\""
        );
    }

    #[test]
    fn complete_frame_is_final() {
        let frame = EventFrame {
            execution_id: ExecutionId::generate(),
            sequence: 3,
            kind: EventKind::Complete,
            payload: serde_json::Value::Null,
            at: Utc::now(),
        };
        assert!(frame.is_final());
    }
}
