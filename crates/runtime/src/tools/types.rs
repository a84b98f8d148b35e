//! Tool-related types.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use policy::CapabilityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ToolError;
use crate::schema::SchemaNode;

/// Executes a tool call.
///
/// This is the boundary between orchestration and side effects. Handlers
/// report what they changed through [`ToolOutput::effect`] instead of
/// leaving the caller to guess from the payload.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value) -> Result<ToolOutput, ToolError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
///
/// ```
/// use runtime::{ToolOutput, handler_fn};
///
/// let echo = handler_fn(|params| async move { Ok(ToolOutput::new(params)) });
/// # let _ = echo;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    async fn call(&self, params: Value) -> Result<ToolOutput, ToolError> {
        (self.0)(params).await
    }
}

/// The side effect a tool call had, declared by its handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum EffectKind {
    FileCreated(String),
    FileModified(String),
    CommandRun(String),
    #[default]
    None,
}

/// What a handler returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub data: Value,
    pub effect: EffectKind,
}

impl ToolOutput {
    pub fn new(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            effect: EffectKind::None,
        }
    }

    pub fn with_effect(mut self, effect: EffectKind) -> Self {
        self.effect = effect;
        self
    }
}

/// A tool as registered: schema, description and (optionally) a handler.
///
/// A definition without a handler can be described to a model but not run.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub schema: SchemaNode,
    /// Declared capability; `None` leaves classification to the policy.
    pub capability: Option<CapabilityKind>,
    pub handler: Option<Arc<dyn ToolHandler>>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: impl Into<SchemaNode>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: schema.into(),
            capability: None,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_capability(mut self, capability: CapabilityKind) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn is_executable(&self) -> bool {
        self.handler.is_some()
    }

    /// The handler-free view handed to models and clients.
    pub fn describable(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.clone(),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .field("capability", &self.capability)
            .field("executable", &self.handler.is_some())
            .finish()
    }
}

/// A tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: SchemaNode,
}

/// Outcome of one tool call, in the shape handed back to callers.
///
/// `success == false` always carries an `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecutionResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

impl From<ToolError> for ToolExecutionResult {
    fn from(error: ToolError) -> Self {
        Self::failure(error.to_string())
    }
}
