use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Side-effect categories a tool call can fall into.
///
/// Only [`CapabilityKind::FsWrite`] and [`CapabilityKind::Exec`] can ever
/// require human confirmation; inspection never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Read-only or inspection tools (read a file, search, list).
    Inspect,
    /// File creation or modification.
    FsWrite,
    /// Arbitrary command execution.
    Exec,
}

impl CapabilityKind {
    /// Whether calls of this kind may be gated behind approval.
    pub fn is_side_effect(self) -> bool {
        !matches!(self, CapabilityKind::Inspect)
    }

    /// Guess the capability of a tool from its name.
    ///
    /// Used for tools that declare nothing themselves, such as tools
    /// discovered on an external provider.
    pub fn infer(tool_name: &str) -> Self {
        let name = tool_name.to_ascii_lowercase();
        const EXEC_HINTS: &[&str] = &["run", "exec", "command", "shell", "bash", "terminal"];
        const WRITE_HINTS: &[&str] = &[
            "write", "create", "edit", "delete", "remove", "patch", "move", "rename", "mkdir",
        ];

        let words: Vec<&str> = name
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |hints: &[&str]| words.iter().any(|w| hints.contains(w));

        if has(EXEC_HINTS) {
            CapabilityKind::Exec
        } else if has(WRITE_HINTS) {
            CapabilityKind::FsWrite
        } else {
            CapabilityKind::Inspect
        }
    }
}

/// A classified tool call, ready to be checked against a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    pub tool: String,
    pub kind: CapabilityKind,
    pub scope: Option<String>, // path for writes, command line for exec
}

impl CapabilityRequest {
    pub fn new(tool: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            tool: tool.into(),
            kind,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Build a request for a tool call, pulling the scope out of the params.
    ///
    /// Writes are scoped by `path` (or `file_path`), commands by `command`.
    pub fn for_call(tool: impl Into<String>, kind: CapabilityKind, params: &Value) -> Self {
        let keys: &[&str] = match kind {
            CapabilityKind::Inspect => &[],
            CapabilityKind::FsWrite => &["path", "file_path", "filePath"],
            CapabilityKind::Exec => &["command", "cmd"],
        };
        let scope = keys
            .iter()
            .find_map(|key| params.get(*key).and_then(Value::as_str))
            .map(str::to_string);

        Self {
            tool: tool.into(),
            kind,
            scope,
        }
    }
}
