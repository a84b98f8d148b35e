//! The tool registry: one name space over every connected provider.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use mcp::ServerConfig;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{McpProvider, ToolDefinition, ToolProvider, ToolSpec};

/// An executable tool with the provider it came from.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub provider_id: String,
}

/// Whether a provider's tools could be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    Available,
    Unavailable { reason: String },
}

/// Diagnostic view of one provider binding.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub provider_id: String,
    #[serde(flatten)]
    pub status: ProviderStatus,
    /// Tools currently attributed to this provider.
    pub tools: Vec<String>,
}

/// A name taken over by a later registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolConflict {
    pub tool: String,
    pub overridden: String,
    pub winner: String,
}

struct ProviderBinding {
    status: ProviderStatus,
    tools: BTreeSet<String>,
    connection: Option<Arc<dyn ToolProvider>>,
}

#[derive(Default)]
struct Inner {
    providers: BTreeMap<String, ProviderBinding>,
    executable: BTreeMap<String, RegisteredTool>,
    describable: BTreeMap<String, ToolSpec>,
    conflicts: Vec<ToolConflict>,
}

impl Inner {
    /// Remove a binding and every tool it still owns.
    fn detach(&mut self, provider_id: &str) -> Option<ProviderBinding> {
        let binding = self.providers.remove(provider_id)?;
        for name in &binding.tools {
            let owned = self
                .executable
                .get(name)
                .is_some_and(|t| t.provider_id == provider_id);
            if owned {
                self.executable.remove(name);
                self.describable.remove(name);
            }
        }
        Some(binding)
    }

    fn attach(
        &mut self,
        provider_id: String,
        status: ProviderStatus,
        tools: Vec<ToolDefinition>,
        connection: Option<Arc<dyn ToolProvider>>,
    ) {
        let mut owned = BTreeSet::new();

        for mut definition in tools {
            definition.schema = std::mem::take(&mut definition.schema).sanitize();
            let name = definition.name.clone();

            if let Some(previous) = self.executable.get(&name) {
                if previous.provider_id != provider_id {
                    warn!(
                        tool = %name,
                        overridden = %previous.provider_id,
                        provider = %provider_id,
                        "tool name conflict, later provider wins"
                    );
                    let overridden = previous.provider_id.clone();
                    if let Some(binding) = self.providers.get_mut(&overridden) {
                        binding.tools.remove(&name);
                    }
                    self.conflicts.push(ToolConflict {
                        tool: name.clone(),
                        overridden,
                        winner: provider_id.clone(),
                    });
                }
            }

            self.describable.insert(name.clone(), definition.describable());
            self.executable.insert(
                name.clone(),
                RegisteredTool {
                    definition,
                    provider_id: provider_id.clone(),
                },
            );
            owned.insert(name);
        }

        self.providers.insert(
            provider_id,
            ProviderBinding {
                status,
                tools: owned,
                connection,
            },
        );
    }
}

/// Holds the union of tools contributed by every provider.
///
/// Registration is last-writer-wins on tool names. Removing a provider does
/// not bring back tools it had overridden.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry").finish_non_exhaustive()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a provider's tools.
    ///
    /// Schemas are sanitized on the way in. Never fails.
    pub async fn register_provider(
        &self,
        provider_id: impl Into<String>,
        tools: impl IntoIterator<Item = ToolDefinition>,
    ) {
        let provider_id = provider_id.into();
        let tools: Vec<_> = tools.into_iter().collect();
        info!(provider = %provider_id, count = tools.len(), "registering provider");
        self.install(provider_id, ProviderStatus::Available, tools, None)
            .await;
    }

    /// Record a provider that could not supply tools.
    pub async fn register_unavailable(&self, provider_id: impl Into<String>, reason: impl Into<String>) {
        let provider_id = provider_id.into();
        let reason = reason.into();
        warn!(provider = %provider_id, %reason, "provider unavailable");
        self.install(
            provider_id,
            ProviderStatus::Unavailable { reason },
            Vec::new(),
            None,
        )
        .await;
    }

    /// Fetch a provider's tools and register them.
    ///
    /// The provider is kept as the binding's connection and shut down when
    /// the binding goes away. A failed fetch leaves it `Unavailable`.
    pub async fn connect(&self, provider: Arc<dyn ToolProvider>) {
        let provider_id = provider.id().to_string();
        match provider.tools().await {
            Ok(tools) => {
                info!(provider = %provider_id, count = tools.len(), "provider connected");
                self.install(provider_id, ProviderStatus::Available, tools, Some(provider))
                    .await;
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(provider = %provider_id, %reason, "provider unavailable");
                self.install(
                    provider_id,
                    ProviderStatus::Unavailable { reason },
                    Vec::new(),
                    Some(provider),
                )
                .await;
            }
        }
    }

    /// Spawn and connect MCP servers. Servers that fail to start are
    /// recorded as unavailable; the rest are unaffected.
    pub async fn connect_servers(&self, configs: impl IntoIterator<Item = ServerConfig>) {
        for config in configs {
            let name = config.name.clone();
            match McpProvider::connect(config).await {
                Ok(provider) => self.connect(Arc::new(provider)).await,
                Err(e) => self.register_unavailable(name, e.to_string()).await,
            }
        }
    }

    async fn install(
        &self,
        provider_id: String,
        status: ProviderStatus,
        tools: Vec<ToolDefinition>,
        connection: Option<Arc<dyn ToolProvider>>,
    ) {
        let replaced = {
            let mut inner = self.inner.write().await;
            let replaced = inner.detach(&provider_id);
            inner.attach(provider_id, status, tools, connection.clone());
            replaced.and_then(|b| b.connection)
        };

        if let Some(old) = replaced {
            let same = connection.as_ref().is_some_and(|new| Arc::ptr_eq(new, &old));
            if !same {
                old.shutdown().await;
            }
        }
    }

    /// Remove a provider and every tool it currently owns.
    pub async fn unregister_provider(&self, provider_id: &str) {
        let removed = self.inner.write().await.detach(provider_id);
        match removed {
            Some(binding) => {
                info!(provider = %provider_id, "provider removed");
                if let Some(connection) = binding.connection {
                    connection.shutdown().await;
                }
            }
            None => debug!(provider = %provider_id, "unregister of unknown provider"),
        }
    }

    pub async fn get_executable(&self, name: &str) -> Option<RegisteredTool> {
        self.inner.read().await.executable.get(name).cloned()
    }

    /// Snapshot of every tool, without handlers.
    pub async fn get_describable(&self) -> BTreeMap<String, ToolSpec> {
        self.inner.read().await.describable.clone()
    }

    /// Describable tools as a list, sorted by name.
    pub async fn specs(&self) -> Vec<ToolSpec> {
        self.inner.read().await.describable.values().cloned().collect()
    }

    pub async fn is_known(&self, name: &str) -> bool {
        self.inner.read().await.executable.contains_key(name)
    }

    pub async fn providers(&self) -> Vec<ProviderInfo> {
        let inner = self.inner.read().await;
        inner
            .providers
            .iter()
            .map(|(id, binding)| ProviderInfo {
                provider_id: id.clone(),
                status: binding.status.clone(),
                tools: binding.tools.iter().cloned().collect(),
            })
            .collect()
    }

    /// Every override seen so far, oldest first.
    pub async fn conflicts(&self) -> Vec<ToolConflict> {
        self.inner.read().await.conflicts.clone()
    }

    /// Drop every provider, shutting down their connections.
    pub async fn shutdown(&self) {
        let bindings = {
            let mut inner = self.inner.write().await;
            inner.executable.clear();
            inner.describable.clear();
            std::mem::take(&mut inner.providers)
        };
        for (_id, binding) in bindings {
            if let Some(connection) = binding.connection {
                connection.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ProviderError, StaticProvider, ToolOutput, handler_fn};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn tool(name: &str, tag: &'static str) -> ToolDefinition {
        ToolDefinition::new(name, format!("{name} from {tag}"), json!({"type": "object"}))
            .with_handler(handler_fn(move |_| async move { Ok(ToolOutput::new(json!(tag))) }))
    }

    #[tokio::test]
    async fn empty_registry_has_no_tools() {
        let registry = ToolRegistry::new();
        assert!(registry.get_describable().await.is_empty());
        assert!(!registry.is_known("anything").await);
    }

    #[tokio::test]
    async fn registration_sanitizes_schemas() {
        let registry = ToolRegistry::new();
        let def = ToolDefinition::new(
            "t",
            "",
            json!({"type": "object", "additionalProperties": false, "properties": {
                "x": {"anyOf": [{"type": "null"}, {"type": "string"}]}
            }}),
        );
        registry.register_provider("p", [def]).await;

        let spec = &registry.get_describable().await["t"];
        assert_eq!(
            Value::from(&spec.parameters),
            json!({"type": "object", "properties": {"x": {"type": "string"}}})
        );
        let exec = registry.get_executable("t").await.unwrap();
        assert_eq!(exec.definition.schema, spec.parameters);
    }

    #[tokio::test]
    async fn reregistration_replaces_previous_tools() {
        let registry = ToolRegistry::new();
        registry.register_provider("p", [tool("old", "p")]).await;
        registry.register_provider("p", [tool("new", "p")]).await;

        assert!(!registry.is_known("old").await);
        assert!(registry.is_known("new").await);
        assert!(registry.conflicts().await.is_empty());
    }

    #[tokio::test]
    async fn unregister_keeps_other_providers() {
        let registry = ToolRegistry::new();
        registry.register_provider("a", [tool("shared", "a"), tool("only_a", "a")]).await;
        registry.register_provider("b", [tool("shared", "b"), tool("only_b", "b")]).await;

        registry.unregister_provider("a").await;
        assert!(!registry.is_known("only_a").await);
        assert_eq!(registry.get_executable("shared").await.unwrap().provider_id, "b");
        assert!(registry.is_known("only_b").await);
    }

    #[tokio::test]
    async fn overridden_provider_loses_attribution() {
        let registry = ToolRegistry::new();
        registry.register_provider("a", [tool("shared", "a")]).await;
        registry.register_provider("b", [tool("shared", "b")]).await;

        let providers = registry.providers().await;
        let a = providers.iter().find(|p| p.provider_id == "a").unwrap();
        assert!(a.tools.is_empty());
        assert_eq!(
            registry.conflicts().await,
            vec![ToolConflict {
                tool: "shared".into(),
                overridden: "a".into(),
                winner: "b".into()
            }]
        );
    }

    struct Broken;

    #[async_trait]
    impl ToolProvider for Broken {
        fn id(&self) -> &str {
            "broken"
        }
        async fn tools(&self) -> Result<Vec<ToolDefinition>, ProviderError> {
            Err(ProviderError::Connection("refused".into()))
        }
    }

    #[tokio::test]
    async fn failing_provider_is_recorded_unavailable() {
        let registry = ToolRegistry::new();
        registry.connect(Arc::new(Broken)).await;
        registry
            .connect(Arc::new(StaticProvider::new("ok").with_tool(tool("t", "ok"))))
            .await;

        let providers = registry.providers().await;
        assert_eq!(providers.len(), 2);
        assert_eq!(
            providers[0].status,
            ProviderStatus::Unavailable {
                reason: "provider unreachable: refused".into()
            }
        );
        assert!(providers[0].tools.is_empty());
        assert_eq!(providers[1].status, ProviderStatus::Available);
        assert!(registry.is_known("t").await);
    }

    struct Tracked {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ToolProvider for Tracked {
        fn id(&self) -> &str {
            "tracked"
        }
        async fn tools(&self) -> Result<Vec<ToolDefinition>, ProviderError> {
            Ok(vec![tool("t", "tracked")])
        }
        async fn shutdown(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn unregister_shuts_down_connection() {
        let closed = Arc::new(AtomicBool::new(false));
        let registry = ToolRegistry::new();
        registry
            .connect(Arc::new(Tracked {
                closed: Arc::clone(&closed),
            }))
            .await;
        assert!(!closed.load(Ordering::SeqCst));

        registry.unregister_provider("tracked").await;
        assert!(closed.load(Ordering::SeqCst));
        assert!(registry.providers().await.is_empty());
    }
}
