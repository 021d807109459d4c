//! Error kinds surfaced at the tool-verb boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable failure category carried in `{ok: false}` verb responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownWorkflow,
    InvalidArguments,
    UnknownTool,
    ToolDisabled,
    TooManyActive,
    ProviderUnavailable,
    ProviderError,
    WorkflowTimeout,
    SubtaskTimeout,
    Cancelled,
    Shutdown,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownWorkflow => "unknown_workflow",
            Self::InvalidArguments => "invalid_arguments",
            Self::UnknownTool => "unknown_tool",
            Self::ToolDisabled => "tool_disabled",
            Self::TooManyActive => "too_many_active",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderError => "provider_error",
            Self::WorkflowTimeout => "workflow_timeout",
            Self::SubtaskTimeout => "subtask_timeout",
            Self::Cancelled => "cancelled",
            Self::Shutdown => "shutdown",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
