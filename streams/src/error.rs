//! Stream fabric error types.

use thiserror::Error;
use uuid::Uuid;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Unknown stream: {0}")]
    UnknownStream(Uuid),

    #[error("Stream is closed: {0}")]
    Closed(Uuid),

    #[error("Too many live streams (limit {0})")]
    TooManyStreams(usize),
}
