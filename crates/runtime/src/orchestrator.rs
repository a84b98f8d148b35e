//! The orchestrator: one bounded, approval-gated agent run at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use storage::{Event, EventKind, EventStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalGate, Verdict};
use crate::session::{ExecutionSession, SessionStatus, ToolCallRecord};
use crate::tools::{ToolError, ToolExecutionResult, ToolRegistry, dispatch};

/// Limits applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_iterations: u32,
    pub tool_timeout: Duration,
    /// Remaining iterations at or below which the run is "near the limit".
    pub near_limit_threshold: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tool_timeout: Duration::from_secs(120),
            near_limit_threshold: 5,
        }
    }
}

/// Drives one [`ExecutionSession`].
///
/// State changes go through `&mut self`, so one turn mutates the session
/// at a time. The orchestrator does not check [`can_continue`] inside
/// [`execute_tool`]; callers gate dispatch on it.
///
/// [`can_continue`]: Orchestrator::can_continue
/// [`execute_tool`]: Orchestrator::execute_tool
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    gate: ApprovalGate,
    settings: OrchestratorSettings,
    session: ExecutionSession,
    store: Option<EventStore>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ToolRegistry>, gate: ApprovalGate, settings: OrchestratorSettings) -> Self {
        Self {
            registry,
            gate,
            session: ExecutionSession::new(settings.max_iterations),
            settings,
            store: None,
        }
    }

    /// Append session events to `store`.
    pub fn with_store(mut self, store: EventStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session(&self) -> &ExecutionSession {
        &self.session
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn start_session(&mut self, task: impl Into<String>) {
        let task = task.into();
        self.session = ExecutionSession::new(self.settings.max_iterations);
        self.session.status = SessionStatus::Thinking;
        self.session.current_task = Some(task.clone());
        self.session.started_at = Some(Utc::now());
        info!(session = %self.session.id, %task, "session started");
        self.audit(EventKind::SessionStart { task });
    }

    /// Run one tool call through the gate and the registry.
    ///
    /// Every failure comes back as an unsuccessful result.
    pub async fn execute_tool(&mut self, name: &str, params: Value) -> ToolExecutionResult {
        let Some(tool) = self.registry.get_executable(name).await else {
            warn!(tool = name, "unknown tool");
            return ToolError::NotFound(name.to_string()).into();
        };

        match self.gate.evaluate(name, tool.definition.capability, &params) {
            Verdict::Proceed => {}
            Verdict::Refuse { reason } => {
                self.audit(EventKind::ApprovalResolved {
                    name: name.to_string(),
                    approved: false,
                });
                return self.record_denial(name, params, reason);
            }
            Verdict::Confirm(request) => {
                let resume = self.session.status;
                self.set_live_status(SessionStatus::WaitingForApproval);
                self.session.pending_approval = Some(request.clone());
                self.audit(EventKind::ApprovalRequested {
                    name: name.to_string(),
                    reason: request.reason.clone(),
                });

                let waited = Instant::now();
                let approved = self.gate.confirm(&request).await;
                self.session.approval_wait += waited.elapsed();
                self.session.pending_approval = None;
                self.audit(EventKind::ApprovalResolved {
                    name: name.to_string(),
                    approved,
                });

                if !approved {
                    if self.session.status == SessionStatus::WaitingForApproval {
                        self.session.status = resume;
                    }
                    return self.record_denial(name, params, "declined by user".to_string());
                }
            }
        }

        let entry = self.session.status;
        self.set_live_status(SessionStatus::Executing);

        let call_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        debug!(tool = name, %call_id, "dispatching tool");
        self.audit(EventKind::ToolCall {
            call_id: call_id.clone(),
            name: name.to_string(),
            params: params.clone(),
        });

        let outcome = match tool.definition.handler.clone() {
            Some(handler) => dispatch::invoke(handler, params.clone(), self.settings.tool_timeout).await,
            None => Err(ToolError::NoHandler(name.to_string())),
        };
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Ok(output) => {
                self.session.record_effect(output.effect);
                ToolExecutionResult::success(output.data)
            }
            Err(e) => {
                warn!(tool = name, %call_id, error = %e, "tool call failed");
                ToolExecutionResult::from(e)
            }
        };
        debug!(tool = name, %call_id, duration_ms, success = result.success, "tool finished");

        self.audit(EventKind::ToolResult {
            call_id: call_id.clone(),
            name: name.to_string(),
            success: result.success,
            output: result
                .data
                .clone()
                .or_else(|| result.error.clone().map(Value::String))
                .unwrap_or(Value::Null),
            duration_ms,
        });
        self.session.tool_calls.push(ToolCallRecord {
            id: call_id,
            name: name.to_string(),
            params,
            result: result.clone(),
            started_at,
            duration_ms,
        });
        self.session.total_tool_calls += 1;

        if entry.is_live() {
            self.set_live_status(SessionStatus::Thinking);
        }
        result
    }

    /// Change status only while the session is running.
    fn set_live_status(&mut self, status: SessionStatus) {
        if self.session.status.is_live() {
            self.session.status = status;
        }
    }

    fn record_denial(&mut self, name: &str, params: Value, reason: String) -> ToolExecutionResult {
        info!(tool = name, %reason, "tool call not approved");
        let result = ToolExecutionResult::from(ToolError::NotApproved(format!("{name}: {reason}")));
        self.session.tool_calls.push(ToolCallRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            params,
            result: result.clone(),
            started_at: Utc::now(),
            duration_ms: 0,
        });
        self.session.total_tool_calls += 1;
        result
    }

    /// Count one iteration and report whether another may follow.
    pub fn increment_iteration(&mut self) -> bool {
        self.session.iteration += 1;
        let can = self.session.can_continue();
        if !can {
            info!(
                session = %self.session.id,
                iteration = self.session.iteration,
                "iteration budget exhausted"
            );
        }
        can
    }

    pub fn can_continue(&self) -> bool {
        self.session.can_continue()
    }

    pub fn is_near_iteration_limit(&self) -> bool {
        self.session.remaining_iterations() <= self.settings.near_limit_threshold
    }

    /// Directive to inject into the conversation when the budget runs low.
    pub fn iteration_warning(&self) -> Option<String> {
        if !self.is_near_iteration_limit() {
            return None;
        }
        let remaining = self.session.remaining_iterations();
        Some(format!(
            "You have {remaining} iteration(s) left out of {}. Wrap up: finish the current \
             step, summarize what was done and what remains.",
            self.session.max_iterations
        ))
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(session = %self.session.id, error = %message, "session failed");
        self.session.status = SessionStatus::Error;
        self.session.error_message = Some(message);
        self.finish();
    }

    pub fn complete(&mut self) {
        if self.session.status == SessionStatus::Error {
            return;
        }
        self.session.status = SessionStatus::Completed;
        self.finish();
    }

    /// User-initiated stop. Safe from any state; an in-flight handler is not
    /// cancelled.
    pub fn abort(&mut self) {
        let was = self.session.status;
        self.session.status = SessionStatus::Idle;
        self.session.pending_approval = None;
        if was.is_live() {
            info!(session = %self.session.id, "session aborted");
            self.finish_as("aborted");
        }
    }

    /// Back to a fresh idle session.
    pub fn reset(&mut self) {
        self.session = ExecutionSession::new(self.settings.max_iterations);
    }

    pub fn get_session_summary(&self) -> String {
        self.session.summary()
    }

    fn finish(&mut self) {
        let status = self.session.status.as_str();
        self.finish_as(status);
    }

    fn finish_as(&mut self, status: &str) {
        if self.session.ended_at.is_some() {
            return;
        }
        self.session.ended_at = Some(Utc::now());
        if self.session.started_at.is_some() {
            self.audit(EventKind::SessionEnd {
                status: status.to_string(),
                summary: self.session.summary(),
            });
        }
    }

    fn audit(&self, kind: EventKind) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.append(&Event::new(self.session.id, kind)) {
            warn!(error = %e, "failed to append audit event");
        }
    }
}
