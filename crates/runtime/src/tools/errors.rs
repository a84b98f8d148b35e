use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not approved: {0}")]
    NotApproved(String),
    #[error("no execute function for tool {0}")]
    NoHandler(String),
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Why a provider could not supply its tools.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Connection(String),

    #[error(transparent)]
    Protocol(#[from] mcp::Error),
}
