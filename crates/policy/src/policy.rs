//! Approval policy configuration and evaluation.

use crate::{CapabilityKind, CapabilityRequest, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

/// Approval settings, usually loaded from the `[approval]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Run file writes without asking.
    #[serde(default)]
    pub auto_approve_file_writes: bool,

    /// Run commands without asking.
    #[serde(default)]
    pub auto_approve_commands: bool,

    /// Scopes that never need confirmation.
    #[serde(default)]
    pub allow: AllowRules,

    /// Capabilities refused outright (overrides everything else).
    #[serde(default)]
    pub deny: DenyRules,

    /// Capability overrides by tool name.
    #[serde(default)]
    pub tools: HashMap<String, CapabilityKind>,
}

/// Scopes that are pre-approved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowRules {
    /// Writable paths (prefixes or `dir/*`, `dir/**` globs).
    #[serde(default)]
    pub fs_write: Vec<String>,

    /// Commands (exact or prefix match).
    #[serde(default)]
    pub exec: Vec<String>,
}

/// Capabilities that are never granted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenyRules {
    #[serde(default)]
    pub all: HashSet<CapabilityKind>,
}

/// Result of evaluating a capability request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Run without asking.
    Allow,
    /// Ask a human first.
    Ask { reason: String },
    /// Refuse without asking.
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn needs_approval(&self) -> bool {
        matches!(self, Decision::Ask { .. })
    }
}

impl Policy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Ask before every side effect.
    pub fn restrictive() -> Self {
        Self::default()
    }

    /// Never ask. Meant for tests and trusted sandboxes.
    pub fn permissive() -> Self {
        Self {
            auto_approve_file_writes: true,
            auto_approve_commands: true,
            ..Default::default()
        }
    }

    /// Resolve the capability of a tool.
    ///
    /// A per-tool override wins, then whatever the tool declared, then a
    /// guess from the name.
    pub fn classify(&self, tool: &str, declared: Option<CapabilityKind>) -> CapabilityKind {
        self.tools
            .get(tool)
            .copied()
            .or(declared)
            .unwrap_or_else(|| CapabilityKind::infer(tool))
    }

    /// Whether a call must be confirmed by a human before it runs.
    pub fn needs_approval(&self, request: &CapabilityRequest) -> bool {
        self.check(request).needs_approval()
    }

    /// Evaluate a capability request.
    pub fn check(&self, request: &CapabilityRequest) -> Decision {
        if !request.kind.is_side_effect() {
            return Decision::Allow;
        }

        if self.deny.all.contains(&request.kind) {
            return Decision::Deny {
                reason: format!("{:?} is denied by policy", request.kind),
            };
        }

        let (auto, allowed) = match request.kind {
            CapabilityKind::FsWrite => (
                self.auto_approve_file_writes,
                path_allowed(&self.allow.fs_write, request.scope.as_deref()),
            ),
            CapabilityKind::Exec => (
                self.auto_approve_commands,
                command_allowed(&self.allow.exec, request.scope.as_deref()),
            ),
            CapabilityKind::Inspect => return Decision::Allow,
        };

        if auto || allowed {
            return Decision::Allow;
        }

        let what = match request.kind {
            CapabilityKind::FsWrite => "writes files",
            _ => "executes a command",
        };
        Decision::Ask {
            reason: format!(
                "{} {what}{}",
                request.tool,
                request
                    .scope
                    .as_ref()
                    .map(|s| format!(": {s}"))
                    .unwrap_or_default()
            ),
        }
    }
}

fn path_allowed(allowlist: &[String], scope: Option<&str>) -> bool {
    // An unscoped write is never pre-approved by a path list.
    let Some(path) = scope else {
        return false;
    };
    let path = normalize(Path::new(path));

    allowlist.iter().any(|pattern| {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        // foo/** matches anything below foo
        if let Some(prefix) = pattern.strip_suffix("/**") {
            return path.starts_with(normalize(Path::new(prefix)));
        }
        // foo/* matches foo/bar but not foo/bar/baz
        if let Some(prefix) = pattern.strip_suffix("/*") {
            let prefix = normalize(Path::new(prefix));
            return path != prefix && path.parent() == Some(prefix.as_path());
        }
        path.starts_with(normalize(Path::new(pattern)))
    })
}

/// Lexically resolve `.` and `..` without touching the filesystem.
///
/// A `..` that climbs above a relative path's start is kept, so the result
/// can never look like it sits below a directory it escaped from.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

/// Characters that let one command line run more than one program.
const SHELL_CONTROL: &[&str] = &[";", "&", "|", "`", "$(", "\n", "\r", ">", "<"];

fn command_allowed(allowlist: &[String], scope: Option<&str>) -> bool {
    let Some(cmd) = scope else {
        return false;
    };
    let cmd = cmd.trim();
    let chained = SHELL_CONTROL.iter().any(|c| cmd.contains(c));

    allowlist.iter().any(|allowed| {
        // "git" allows "git status" but not "gitk" or "git status; rm -rf ~"
        allowed == "*"
            || cmd == allowed
            || (!chained && cmd.starts_with(&format!("{allowed} ")))
    })
}
