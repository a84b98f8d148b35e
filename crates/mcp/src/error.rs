//! Provider protocol error types.

use std::time::Duration;

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider not initialized")]
    NotInitialized,

    #[error("provider exited unexpectedly")]
    ServerExited,

    #[error("timeout after {0:?} waiting for response")]
    Timeout(Duration),

    #[error("malformed message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },

    #[error("connection out of sync after an interrupted response")]
    ConnectionBroken,
}

pub type Result<T> = std::result::Result<T, Error>;
