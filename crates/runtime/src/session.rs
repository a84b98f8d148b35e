//! Execution session state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use storage::SessionId;

use crate::approval::ApprovalRequest;
use crate::tools::{EffectKind, ToolExecutionResult};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Thinking,
    Executing,
    WaitingForApproval,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Thinking => "thinking",
            SessionStatus::Executing => "executing",
            SessionStatus::WaitingForApproval => "waiting_for_approval",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    /// A session that is running (not idle and not finished).
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionStatus::Thinking | SessionStatus::Executing | SessionStatus::WaitingForApproval
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool call as it happened. Never changed after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub params: Value,
    pub result: ToolExecutionResult,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// The mutable state of one agent run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSession {
    pub id: SessionId,
    pub status: SessionStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub total_tool_calls: usize,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    pub commands_executed: Vec<String>,
    pub current_task: Option<String>,
    pub error_message: Option<String>,
    pub pending_approval: Option<ApprovalRequest>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Time spent waiting on humans.
    #[serde(skip)]
    pub approval_wait: Duration,
}

impl ExecutionSession {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::Idle,
            iteration: 0,
            max_iterations,
            tool_calls: Vec::new(),
            total_tool_calls: 0,
            files_created: Vec::new(),
            files_modified: Vec::new(),
            commands_executed: Vec::new(),
            current_task: None,
            error_message: None,
            pending_approval: None,
            started_at: None,
            ended_at: None,
            approval_wait: Duration::ZERO,
        }
    }

    pub fn can_continue(&self) -> bool {
        self.iteration < self.max_iterations && self.status != SessionStatus::Error
    }

    pub fn remaining_iterations(&self) -> u32 {
        self.max_iterations.saturating_sub(self.iteration)
    }

    /// Wall time since start, minus time spent waiting for approval.
    pub fn active_duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let ended = self.ended_at.unwrap_or_else(Utc::now);
        let elapsed = (ended - started).to_std().unwrap_or_default();
        Some(elapsed.saturating_sub(self.approval_wait))
    }

    pub(crate) fn record_effect(&mut self, effect: EffectKind) {
        match effect {
            EffectKind::FileCreated(path) => {
                if !self.files_created.contains(&path) {
                    self.files_created.push(path);
                }
            }
            EffectKind::FileModified(path) => {
                // A file created in this session stays "created".
                if !self.files_created.contains(&path) && !self.files_modified.contains(&path) {
                    self.files_modified.push(path);
                }
            }
            EffectKind::CommandRun(command) => self.commands_executed.push(command),
            EffectKind::None => {}
        }
    }

    /// Human-readable digest of the session.
    pub fn summary(&self) -> String {
        fn list(items: &[String]) -> String {
            if items.is_empty() {
                "none".to_string()
            } else {
                items.join(", ")
            }
        }

        let failed = self.tool_calls.iter().filter(|c| !c.result.success).count();
        let mut out = String::new();
        if let Some(task) = &self.current_task {
            out.push_str(&format!("Task: {task}\n"));
        }
        out.push_str(&format!("Status: {}\n", self.status));
        out.push_str(&format!(
            "Iterations: {}/{}\n",
            self.iteration, self.max_iterations
        ));
        out.push_str(&format!(
            "Tool calls: {} ({failed} failed)\n",
            self.total_tool_calls
        ));
        out.push_str(&format!(
            "Files created ({}): {}\n",
            self.files_created.len(),
            list(&self.files_created)
        ));
        out.push_str(&format!(
            "Files modified ({}): {}\n",
            self.files_modified.len(),
            list(&self.files_modified)
        ));
        out.push_str(&format!(
            "Commands executed ({}): {}",
            self.commands_executed.len(),
            list(&self.commands_executed)
        ));
        if let Some(error) = &self.error_message {
            out.push_str(&format!("\nError: {error}"));
        }
        out
    }
}
