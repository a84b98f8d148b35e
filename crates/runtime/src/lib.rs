//! Capstan runtime: tool orchestration for coding agents.
//!
//! A model proposes tool calls; this crate decides whether and how they run.
//!
//! # Overview
//!
//! - **Schema sanitizer** ([`schema`]): reduces arbitrary JSON Schema to the
//!   subset strict function-calling providers accept.
//! - **Tool registry** ([`ToolRegistry`]): merges tools from any number of
//!   [`ToolProvider`]s (built-in [`StaticProvider`]s, MCP servers through
//!   [`McpProvider`]) under one name space, last registration wins.
//! - **Approval gate** ([`ApprovalGate`]): policy plus an optional
//!   [`ApprovalChannel`]. No channel means side effects are refused.
//! - **Orchestrator** ([`Orchestrator`]): owns one [`ExecutionSession`] with
//!   an iteration budget, dispatches calls, and records what they changed.
//! - **Invocation bridge** ([`InvocationBridge`]): resolves approve/deny
//!   decisions recorded inside a conversation transcript.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use policy::Policy;
//! use runtime::{
//!     ApprovalGate, Orchestrator, OrchestratorSettings, StaticProvider, ToolDefinition,
//!     ToolOutput, ToolRegistry, handler_fn,
//! };
//! use serde_json::json;
//!
//! # async fn example() {
//! let registry = Arc::new(ToolRegistry::new());
//! let read_file = ToolDefinition::new(
//!     "read_file",
//!     "Read a file",
//!     json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
//! )
//! .with_handler(handler_fn(|_| async { Ok(ToolOutput::new(json!({"content": "hi"}))) }));
//! registry
//!     .connect(Arc::new(StaticProvider::new("fs").with_tool(read_file)))
//!     .await;
//!
//! let gate = ApprovalGate::new(Policy::restrictive());
//! let mut orchestrator = Orchestrator::new(registry, gate, OrchestratorSettings::default());
//! orchestrator.start_session("look around");
//! if orchestrator.can_continue() {
//!     let result = orchestrator.execute_tool("read_file", json!({"path": "/a.txt"})).await;
//!     println!("{result:?}");
//!     orchestrator.increment_iteration();
//! }
//! orchestrator.complete();
//! println!("{}", orchestrator.get_session_summary());
//! # }
//! ```

pub mod approval;
pub mod bridge;
mod error;
pub mod orchestrator;
pub mod schema;
pub mod session;
pub mod tools;
pub mod transcript;

pub use approval::{ApprovalChannel, ApprovalGate, ApprovalRequest, ChannelApprover, Verdict};
pub use bridge::{
    DENIED_RESULT, InvocationBridge, NOTIFICATION_CAPACITY, Resolution, Sentinel, ToolNotification,
};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use schema::{SchemaNode, sanitize};
pub use session::{ExecutionSession, SessionStatus, ToolCallRecord};
pub use tools::{
    EffectKind, McpProvider, ProviderError, ProviderInfo, ProviderStatus, RegisteredTool,
    StaticProvider, ToolConflict, ToolDefinition, ToolError, ToolExecutionResult, ToolHandler,
    ToolOutput, ToolProvider, ToolRegistry, ToolSpec, handler_fn,
};
pub use transcript::{InvocationState, Message, Part, Role, ToolInvocation, Transcript};
