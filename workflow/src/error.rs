//! Workflow error types and their verb-boundary kinds.

use protocol::ErrorKind;
use provider::ProviderError;
use registry::ToolError;
use store::StoreError;
use streams::StreamError;
use thiserror::Error;
use uuid::Uuid;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(Uuid),

    #[error("Invalid arguments: {message}")]
    InvalidArguments {
        /// Offending field, when known.
        field: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Workflow timed out")]
    WorkflowTimeout,

    #[error("Workflow was cancelled")]
    Cancelled,

    #[error("Server is shutting down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    pub fn invalid_arguments(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Machine-readable kind for `{ok: false}` verb responses.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownWorkflow(_) => ErrorKind::UnknownWorkflow,
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::Provider(ProviderError::Unavailable(_)) => ErrorKind::ProviderUnavailable,
            Self::Provider(ProviderError::Timeout(_)) => ErrorKind::SubtaskTimeout,
            Self::Provider(_) => ErrorKind::ProviderError,
            Self::Store(StoreError::TooManyActive { .. }) => ErrorKind::TooManyActive,
            Self::Store(StoreError::NotFound(_)) => ErrorKind::UnknownWorkflow,
            Self::Store(_) => ErrorKind::Internal,
            Self::Stream(_) => ErrorKind::Internal,
            Self::Tool(ToolError::UnknownTool(_)) => ErrorKind::UnknownTool,
            Self::Tool(ToolError::ToolDisabled(_)) => ErrorKind::ToolDisabled,
            Self::Tool(ToolError::InvalidArguments { .. }) => ErrorKind::InvalidArguments,
            Self::Tool(ToolError::InvalidSchema { .. }) => ErrorKind::InvalidArguments,
            Self::Tool(_) => ErrorKind::Internal,
            Self::WorkflowTimeout => ErrorKind::WorkflowTimeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Shutdown => ErrorKind::Shutdown,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Offending field for invalid-argument errors, surfaced as structured
    /// detail.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidArguments { field, .. } => field.as_deref(),
            Self::Tool(ToolError::InvalidArguments { field, .. }) => field.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            WorkflowError::UnknownWorkflow(Uuid::new_v4()).kind(),
            ErrorKind::UnknownWorkflow
        );
        assert_eq!(
            WorkflowError::from(StoreError::TooManyActive { limit: 50 }).kind(),
            ErrorKind::TooManyActive
        );
        assert_eq!(
            WorkflowError::from(ProviderError::Unavailable("x".into())).kind(),
            ErrorKind::ProviderUnavailable
        );
        assert_eq!(
            WorkflowError::from(ToolError::UnknownTool("t".into())).kind(),
            ErrorKind::UnknownTool
        );
        assert_eq!(WorkflowError::Shutdown.kind(), ErrorKind::Shutdown);
    }

    #[test]
    fn test_invalid_arguments_field_detail() {
        let err = WorkflowError::invalid_arguments("num_workers", "must be between 1 and 20");
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert_eq!(err.field(), Some("num_workers"));
    }
}
