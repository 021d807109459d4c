//! Tool registry error types.

use thiserror::Error;

pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool is disabled: {0}")]
    ToolDisabled(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments {
        tool: String,
        message: String,
        /// JSON pointer to the offending field, when known.
        field: Option<String>,
    },

    #[error("Invalid schema for '{tool}': {message}")]
    InvalidSchema { tool: String, message: String },

    #[error("Tool execution failed: {0}")]
    Execution(String),
}
