//! Tool provider trait.

use async_trait::async_trait;

use super::{ProviderError, ToolDefinition};

/// A source of tool definitions.
///
/// Implementations supply their tools when connected to a
/// [`ToolRegistry`](super::ToolRegistry) and release whatever they hold on
/// [`shutdown`](ToolProvider::shutdown).
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Identifier tools are attributed to.
    fn id(&self) -> &str;

    /// Fetch the current tool set.
    async fn tools(&self) -> Result<Vec<ToolDefinition>, ProviderError>;

    /// Release the connection, if any.
    async fn shutdown(&self) {}
}

/// In-process tools known at build time.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    id: String,
    tools: Vec<ToolDefinition>,
}

impl StaticProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        self.tools.extend(tools);
        self
    }
}

#[async_trait]
impl ToolProvider for StaticProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn tools(&self) -> Result<Vec<ToolDefinition>, ProviderError> {
        Ok(self.tools.clone())
    }
}
