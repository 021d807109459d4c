//! State store error types.

use protocol::TaskStatus;
use thiserror::Error;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Workflow already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Workflow not found: {0}")]
    NotFound(Uuid),

    #[error("Too many active workflows (limit {limit})")]
    TooManyActive { limit: usize },

    #[error("Invalid status transition for {id}: {from} → {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Durable backend error: {0}")]
    Backend(String),
}
