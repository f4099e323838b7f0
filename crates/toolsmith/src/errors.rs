use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a tool call produced no result of its own.
///
/// A tool that ran and failed reports that inside its `Ok` payload instead,
/// so the model sees the backend's failure as ordinary tool output.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The arguments did not match the tool's parameter schema
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    /// The tool only runs in the chat client
    #[error("{0} is resolved by the client")]
    ClientSide(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether the model can fix this by calling again with other arguments
    pub fn is_malformed_call(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound(_) | AgentError::InvalidParameters(_)
        )
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
