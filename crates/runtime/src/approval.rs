//! Approval gating for side-effecting tool calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use policy::{CapabilityKind, CapabilityRequest, Decision, Policy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

/// A call waiting on human confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub params: Value,
    pub reason: String,
    pub created_at: String,
}

impl ApprovalRequest {
    pub fn new(tool_name: impl Into<String>, params: Value, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            params,
            reason: reason.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Somewhere to ask a human.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Resolve a request to approve (`true`) or deny (`false`).
    async fn confirm(&self, request: &ApprovalRequest) -> bool;
}

#[async_trait]
impl<F> ApprovalChannel for F
where
    F: Fn(&ApprovalRequest) -> bool + Send + Sync,
{
    async fn confirm(&self, request: &ApprovalRequest) -> bool {
        self(request)
    }
}

/// What the gate says about a call before anything runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Proceed,
    Confirm(ApprovalRequest),
    Refuse { reason: String },
}

/// Policy plus an optional confirmation channel.
///
/// Without a channel every call that needs confirmation is refused.
#[derive(Clone)]
pub struct ApprovalGate {
    policy: Policy,
    channel: Option<Arc<dyn ApprovalChannel>>,
}

impl fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("policy", &self.policy)
            .field("channel", &self.channel.is_some())
            .finish()
    }
}

impl ApprovalGate {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn ApprovalChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    fn decide(&self, tool: &str, declared: Option<CapabilityKind>, params: &Value) -> Decision {
        let kind = self.policy.classify(tool, declared);
        self.policy.check(&CapabilityRequest::for_call(tool, kind, params))
    }

    /// Whether the call needs a human, independent of any channel.
    pub fn needs_approval(
        &self,
        tool: &str,
        declared: Option<CapabilityKind>,
        params: &Value,
    ) -> bool {
        self.decide(tool, declared, params).needs_approval()
    }

    pub fn evaluate(&self, tool: &str, declared: Option<CapabilityKind>, params: &Value) -> Verdict {
        match self.decide(tool, declared, params) {
            Decision::Allow => Verdict::Proceed,
            Decision::Deny { reason } => {
                info!(tool, %reason, "denied by policy");
                Verdict::Refuse { reason }
            }
            Decision::Ask { reason } if self.channel.is_none() => {
                warn!(tool, %reason, "approval required but no confirmation channel");
                Verdict::Refuse {
                    reason: format!("{reason} (no confirmation channel configured)"),
                }
            }
            Decision::Ask { reason } => {
                Verdict::Confirm(ApprovalRequest::new(tool, params.clone(), reason))
            }
        }
    }

    /// Ask the channel. Fails closed when there is none.
    pub async fn confirm(&self, request: &ApprovalRequest) -> bool {
        let approved = match &self.channel {
            Some(channel) => channel.confirm(request).await,
            None => false,
        };
        info!(tool = %request.tool_name, approved, "approval resolved");
        approved
    }
}

struct PendingApproval {
    request: ApprovalRequest,
    responder: oneshot::Sender<bool>,
}

/// Channel for UIs: requests are announced on a queue and answered later
/// with [`resolve`](ChannelApprover::resolve).
///
/// A request whose approver is dropped before answering is denied.
#[derive(Clone)]
pub struct ChannelApprover {
    pending: Arc<Mutex<HashMap<String, PendingApproval>>>,
    announce: mpsc::UnboundedSender<ApprovalRequest>,
}

impl ChannelApprover {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (announce, rx) = mpsc::unbounded_channel();
        let approver = Self {
            pending: Arc::default(),
            announce,
        };
        (approver, rx)
    }

    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values: Vec<ApprovalRequest> =
            guard.values().map(|entry| entry.request.clone()).collect();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        values
    }

    pub fn resolve(&self, approval_id: &str, approve: bool) -> Option<ApprovalRequest> {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(approval_id)?;
        let _ = entry.responder.send(approve);
        Some(entry.request)
    }

    pub fn reject_all(&self) {
        let drained: Vec<PendingApproval> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in drained {
            let _ = entry.responder.send(false);
        }
    }
}

#[async_trait]
impl ApprovalChannel for ChannelApprover {
    async fn confirm(&self, request: &ApprovalRequest) -> bool {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                request.id.clone(),
                PendingApproval {
                    request: request.clone(),
                    responder: tx,
                },
            );

        if self.announce.send(request.clone()).is_err() {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&request.id);
            return false;
        }
        rx.await.unwrap_or(false)
    }
}
