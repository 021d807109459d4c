//! Shared domain types for the Dreamwalker orchestration server.
//!
//! ## Modules
//!
//! - [`status`]: workflow/agent status enumeration and its transition rules
//! - [`task`]: subtasks, agent results, synthesis results, workflow records
//! - [`event`]: lifecycle event taxonomy published on workflow streams
//! - [`error`]: error kinds surfaced at the tool-verb boundary

pub mod error;
pub mod event;
pub mod status;
pub mod task;

pub use error::ErrorKind;
pub use event::{EventType, StreamEvent};
pub use status::TaskStatus;
pub use task::{
    AgentResult, AgentType, DocumentArtifact, OrchestratorResult, SubTask, SynthesisLevel,
    SynthesisResult, WorkflowRecord,
};

/// Identity of one workflow execution.
pub type WorkflowId = uuid::Uuid;
