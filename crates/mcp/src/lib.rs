//! Client for the tool-provider protocol (MCP, JSON-RPC 2.0 over
//! newline-delimited streams).
//!
//! A [`Client`] can be spawned as a child process speaking over stdio, or
//! wrapped around any async reader/writer pair.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Client, ServerConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig {
//!     name: "filesystem".to_string(),
//!     command: "mcp-server-filesystem".to_string(),
//!     args: vec!["/tmp".to_string()],
//!     ..Default::default()
//! };
//!
//! let client = Client::connect(config).await?;
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = client
//!     .call_tool("read_file", Some(serde_json::json!({ "path": "/tmp/notes.txt" })))
//!     .await?;
//! println!("{}", result.text());
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod protocol;

pub use client::{Client, DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, ServerConfig};
pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, Implementation, Incoming, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, RequestId,
    ServerCapabilities, Tool, ToolAnnotations, ToolContent,
};
