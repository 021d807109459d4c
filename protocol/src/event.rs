//! Lifecycle event taxonomy published on workflow streams.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Type of a workflow lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    TaskDecomposed,
    AgentStarted,
    AgentProgress,
    AgentCompleted,
    SynthesisStarted,
    SynthesisCompleted,
    DocumentsGenerated,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    ShuttingDown,
}

impl EventType {
    /// Terminal events end a workflow's stream.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted | Self::WorkflowFailed | Self::WorkflowCancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::TaskDecomposed => "task_decomposed",
            Self::AgentStarted => "agent_started",
            Self::AgentProgress => "agent_progress",
            Self::AgentCompleted => "agent_completed",
            Self::SynthesisStarted => "synthesis_started",
            Self::SynthesisCompleted => "synthesis_completed",
            Self::DocumentsGenerated => "documents_generated",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::WorkflowCancelled => "workflow_cancelled",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event on a workflow's stream.
///
/// Sequence numbers are dense per workflow, starting at 0, assigned by the
/// stream bus at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub workflow_id: Uuid,
    pub seq: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl StreamEvent {
    pub fn new(workflow_id: Uuid, seq: u64, event_type: EventType, payload: Value) -> Self {
        Self {
            workflow_id,
            seq,
            event_type,
            timestamp: Utc::now(),
            payload,
        }
    }
}
