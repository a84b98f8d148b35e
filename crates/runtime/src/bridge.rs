//! Resolving approved and denied tool invocations inside a transcript.
//!
//! A UI records the human's decision by writing a [`Sentinel`] into the
//! result slot of a tool invocation. [`InvocationBridge::resolve_transcript`]
//! replaces those sentinels with real results and returns one
//! [`ToolNotification`] per resolved call. The same notifications are also
//! published on a broadcast channel for live listeners; a listener that falls
//! more than [`NOTIFICATION_CAPACITY`] behind sees `Lagged` and misses some.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::tools::{ToolRegistry, dispatch};
use crate::transcript::{InvocationState, Message, Part, ToolInvocation};

/// Reserved values standing in for a decision or an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Approve,
    Deny,
    ExecutionError,
    NoHandler,
}

impl Sentinel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Sentinel::Approve => "Yes, confirmed.",
            Sentinel::Deny => "No, denied.",
            Sentinel::ExecutionError => "Error: An error occurred while executing the tool.",
            Sentinel::NoHandler => "Error: No execute function found on tool",
        }
    }

    pub fn parse(value: &Value) -> Option<Self> {
        [
            Sentinel::Approve,
            Sentinel::Deny,
            Sentinel::ExecutionError,
            Sentinel::NoHandler,
        ]
        .into_iter()
        .find(|s| value.as_str() == Some(s.as_str()))
    }

    pub fn to_value(self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

/// Final result written for a denied call. Not a sentinel, so a second pass
/// leaves it alone.
pub const DENIED_RESULT: &str = "Error: User denied access to tool execution";

/// Emitted once per invocation the bridge resolves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolNotification {
    pub tool_call_id: String,
    /// Provider the tool is attributed to.
    pub source: String,
    pub tool_name: String,
    pub tool_description: String,
    pub result: Value,
}

/// Buffer of the live notification channel.
pub const NOTIFICATION_CAPACITY: usize = 64;

/// Outcome of one bridge pass.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub transcript: Vec<Arc<Message>>,
    /// One per resolved invocation, in part order.
    pub notifications: Vec<ToolNotification>,
}

pub struct InvocationBridge {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    notifications: broadcast::Sender<ToolNotification>,
}

impl InvocationBridge {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            registry,
            timeout: Duration::from_secs(120),
            notifications,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToolNotification> {
        self.notifications.subscribe()
    }

    /// Resolve decided invocations in the last message.
    ///
    /// Earlier messages are returned as the same `Arc`s. The last one is
    /// replaced only if at least one part was resolved.
    pub async fn process(&self, transcript: &[Arc<Message>]) -> Vec<Arc<Message>> {
        self.resolve_transcript(transcript).await.transcript
    }

    /// Like [`process`](Self::process), also returning every notification
    /// regardless of how many parts were resolved.
    pub async fn resolve_transcript(&self, transcript: &[Arc<Message>]) -> Resolution {
        let Some((last, earlier)) = transcript.split_last() else {
            return Resolution {
                transcript: Vec::new(),
                notifications: Vec::new(),
            };
        };

        let mut notifications = Vec::new();
        let mut parts = Vec::with_capacity(last.parts.len());
        for part in &last.parts {
            let resolved = match part {
                Part::ToolInvocation { tool_invocation } => self.resolve(tool_invocation).await,
                Part::Text { .. } => None,
            };
            match resolved {
                Some((invocation, notification)) => {
                    // No subscribers is fine.
                    let _ = self.notifications.send(notification.clone());
                    notifications.push(notification);
                    parts.push(Part::invocation(invocation));
                }
                None => parts.push(part.clone()),
            }
        }

        let mut out = earlier.to_vec();
        if notifications.is_empty() {
            out.push(Arc::clone(last));
        } else {
            out.push(Arc::new(Message {
                parts,
                ..Message::clone(last)
            }));
        }
        Resolution {
            transcript: out,
            notifications,
        }
    }

    async fn resolve(&self, invocation: &ToolInvocation) -> Option<(ToolInvocation, ToolNotification)> {
        let decision = invocation.result().and_then(Sentinel::parse)?;
        if !matches!(decision, Sentinel::Approve | Sentinel::Deny) {
            return None;
        }
        let tool = self.registry.get_executable(&invocation.tool_name).await?;
        let call_id = &invocation.tool_call_id;

        let result = if decision == Sentinel::Deny {
            info!(tool = %invocation.tool_name, %call_id, "invocation denied");
            Value::String(DENIED_RESULT.to_string())
        } else {
            match tool.definition.handler.clone() {
                None => Sentinel::NoHandler.to_value(),
                Some(handler) => {
                    debug!(tool = %invocation.tool_name, %call_id, "executing approved invocation");
                    match dispatch::invoke(handler, invocation.args.clone(), self.timeout).await {
                        Ok(output) => output.data,
                        Err(e) => {
                            error!(tool = %invocation.tool_name, %call_id, error = %e, "approved invocation failed");
                            Sentinel::ExecutionError.to_value()
                        }
                    }
                }
            }
        };

        let notification = ToolNotification {
            tool_call_id: call_id.clone(),
            source: tool.provider_id.clone(),
            tool_name: invocation.tool_name.clone(),
            tool_description: tool.definition.description.clone(),
            result: result.clone(),
        };
        let resolved = ToolInvocation {
            state: InvocationState::Result { result },
            ..invocation.clone()
        };
        Some((resolved, notification))
    }
}
