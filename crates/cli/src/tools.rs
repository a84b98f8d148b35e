//! Built-in tools shipped with the binary.

use std::path::Path;

use policy::CapabilityKind;
use runtime::{EffectKind, StaticProvider, ToolDefinition, ToolError, ToolOutput, handler_fn};
use serde_json::{Value, json};

pub const PROVIDER_ID: &str = "builtin";

const MAX_OUTPUT_BYTES: usize = 100_000;

pub fn provider() -> StaticProvider {
    StaticProvider::new(PROVIDER_ID).with_tools([
        read_file(),
        list_directory(),
        write_file(),
        run_command(),
    ])
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing required parameter: {key}")))
}

fn read_file() -> ToolDefinition {
    ToolDefinition::new(
        "read_file",
        "Read the contents of a UTF-8 text file.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to read"}
            },
            "required": ["path"]
        }),
    )
    .with_capability(CapabilityKind::Inspect)
    .with_handler(handler_fn(|params: Value| async move {
        let path = required_str(&params, "path")?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to read {path}: {e}")))?;
        Ok(ToolOutput::new(json!({"path": path, "content": content})))
    }))
}

fn list_directory() -> ToolDefinition {
    ToolDefinition::new(
        "list_directory",
        "List the entries of a directory. Directories end with '/'.",
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "anyOf": [{"type": "string"}, {"type": "null"}],
                    "description": "Directory to list (defaults to the current directory)"
                }
            }
        }),
    )
    .with_capability(CapabilityKind::Inspect)
    .with_handler(handler_fn(|params: Value| async move {
        let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to list {path}: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(ToolOutput::new(json!({"path": path, "entries": entries})))
    }))
}

fn write_file() -> ToolDefinition {
    ToolDefinition::new(
        "write_file",
        "Write content to a file. Creates the file (and parent directories) if \
         it doesn't exist, overwrites it if it does.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "The path to the file to write"},
                "content": {"type": "string", "description": "The content to write"}
            },
            "required": ["path", "content"],
            "additionalProperties": false
        }),
    )
    .with_capability(CapabilityKind::FsWrite)
    .with_handler(handler_fn(|params: Value| async move {
        let path = required_str(&params, "path")?;
        let content = required_str(&params, "content")?;

        let existed = tokio::fs::try_exists(path).await.unwrap_or(false);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ToolError::Execution(format!("failed to create directory for {path}: {e}"))
                })?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to write {path}: {e}")))?;

        let effect = if existed {
            EffectKind::FileModified(path.to_string())
        } else {
            EffectKind::FileCreated(path.to_string())
        };
        Ok(ToolOutput::new(json!({
            "path": path,
            "bytes": content.len(),
            "created": !existed,
            "modified": existed
        }))
        .with_effect(effect))
    }))
}

fn run_command() -> ToolDefinition {
    ToolDefinition::new(
        "run_command",
        "Execute a shell command via `sh -c`. Returns stdout, stderr and the exit code.",
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to execute"},
                "cwd": {"type": "string", "description": "Working directory"}
            },
            "required": ["command"]
        }),
    )
    .with_capability(CapabilityKind::Exec)
    .with_handler(handler_fn(|params: Value| async move {
        let command = required_str(&params, "command")?;
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            cmd.current_dir(cwd);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| ToolError::Execution(format!("failed to execute command: {e}")))?;

        Ok(ToolOutput::new(json!({
            "exit_code": output.status.code(),
            "stdout": truncate(&String::from_utf8_lossy(&output.stdout), MAX_OUTPUT_BYTES),
            "stderr": truncate(&String::from_utf8_lossy(&output.stderr), MAX_OUTPUT_BYTES / 2),
        }))
        .with_effect(EffectKind::CommandRun(command.to_string())))
    }))
}

/// Keep the head and tail of long output.
fn truncate(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let half = max_bytes / 2;
    let mut head = half;
    while !output.is_char_boundary(head) {
        head -= 1;
    }
    let mut tail = output.len() - half;
    while !output.is_char_boundary(tail) {
        tail += 1;
    }
    format!(
        "{}\n\n... ({} bytes omitted) ...\n\n{}",
        &output[..head],
        tail - head,
        &output[tail..]
    )
}
