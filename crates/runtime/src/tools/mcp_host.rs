//! MCP-backed tool provider.

use std::sync::Arc;

use async_trait::async_trait;
use mcp::{Client, ServerConfig};
use policy::CapabilityKind;
use serde_json::Value;
use tracing::debug;

use super::{ProviderError, ToolDefinition, ToolError, ToolHandler, ToolOutput, ToolProvider};
use crate::schema::SchemaNode;

/// Tool provider backed by an MCP server.
pub struct McpProvider {
    client: Arc<Client>,
}

impl McpProvider {
    /// Wrap an already initialized client.
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Spawn the server process and complete the handshake.
    pub async fn connect(config: ServerConfig) -> Result<Self, ProviderError> {
        let client = Client::connect(config).await?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ToolProvider for McpProvider {
    fn id(&self) -> &str {
        self.client.name()
    }

    async fn tools(&self) -> Result<Vec<ToolDefinition>, ProviderError> {
        let tools = self.client.list_tools().await?;
        debug!(provider = %self.id(), count = tools.len(), "listed remote tools");

        Ok(tools
            .into_iter()
            .map(|tool| {
                let read_only = tool
                    .annotations
                    .as_ref()
                    .and_then(|a| a.read_only_hint)
                    .unwrap_or(false);
                let handler = RemoteTool {
                    client: Arc::clone(&self.client),
                    name: tool.name.clone(),
                };
                let mut definition = ToolDefinition::new(
                    tool.name,
                    tool.description.unwrap_or_default(),
                    SchemaNode::from(tool.input_schema),
                )
                .with_handler(handler);
                if read_only {
                    definition = definition.with_capability(CapabilityKind::Inspect);
                }
                definition
            })
            .collect())
    }

    async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}

/// Handler issuing `tools/call` for one remote tool.
struct RemoteTool {
    client: Arc<Client>,
    name: String,
}

#[async_trait]
impl ToolHandler for RemoteTool {
    async fn call(&self, params: Value) -> Result<ToolOutput, ToolError> {
        let arguments = match params {
            Value::Null => None,
            Value::Object(_) => Some(params),
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "arguments must be an object, got {other}"
                )));
            }
        };

        let result = self
            .client
            .call_tool(&self.name, arguments)
            .await
            .map_err(|e| match e {
                mcp::Error::ToolCallFailed(text) => ToolError::Execution(text),
                mcp::Error::Timeout(limit) => ToolError::Timeout(limit.as_millis() as u64),
                other => ToolError::Execution(other.to_string()),
            })?;

        let content = serde_json::to_value(&result.content)
            .map_err(|e| ToolError::Execution(format!("serialize result: {e}")))?;
        Ok(ToolOutput::new(content))
    }
}
