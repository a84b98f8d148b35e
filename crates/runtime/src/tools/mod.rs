//! Tool definitions, providers and the registry.

pub(crate) mod dispatch;
pub mod errors;
mod mcp_host;
mod provider;
mod registry;
mod types;

pub use errors::{ProviderError, ToolError};
pub use mcp_host::McpProvider;
pub use provider::{StaticProvider, ToolProvider};
pub use registry::{ProviderInfo, ProviderStatus, RegisteredTool, ToolConflict, ToolRegistry};
pub use types::{
    EffectKind, FnHandler, ToolDefinition, ToolExecutionResult, ToolHandler, ToolOutput, ToolSpec,
    handler_fn,
};
