//! Shell command execution tool.
//!
//! Generalized from `shell_tool.rs`'s `ShellTool`: same blocked-pattern
//! list, same truncate-on-byte-boundary safety, same bash-in-workspace
//! execution. The only change is the `Tool` contract it implements —
//! positional `args: &[Value]` rather than a `HashMap<String, String>` —
//! so `command` and `timeout` arrive as `args[0]`/`args[1]` per the order
//! declared in `parameters()`.

use async_trait::async_trait;
use ema_core::{Tool, ToolResult};
use serde_json::{json, Value};
use std::process::Command;
use tracing::{debug, info, warn};

const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "mkfs",
    "dd if=",
    ":(){:|:&};:",
    "> /dev/sd",
    "chmod -r 777 /",
    "shutdown",
    "reboot",
    "init 0",
    "init 6",
];

const MAX_OUTPUT_SIZE: usize = 100_000;
const DEFAULT_TIMEOUT: u64 = 60;
const MAX_TIMEOUT: u64 = 300;

pub struct ShellTool {
    workspace: String,
}

impl ShellTool {
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    fn is_blocked(&self, command: &str) -> Option<&'static str> {
        let lower = command.to_lowercase();
        BLOCKED_PATTERNS
            .iter()
            .find(|pattern| lower.contains(*pattern))
            .copied()
    }

    fn truncate_output(&self, output: String) -> String {
        if output.len() <= MAX_OUTPUT_SIZE {
            return output;
        }
        let mut end = MAX_OUTPUT_SIZE;
        while end > 0 && !output.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}\n\n[OUTPUT TRUNCATED - exceeded {} bytes, showing first {}]",
            &output[..end],
            output.len(),
            end
        )
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace. Has access to standard CLI tools \
         (git, curl, jq, grep, sed, awk, python3, node). Use for file operations, \
         running scripts, or system commands."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "shell command to execute (supports pipes, redirects)" },
                "timeout": { "type": "integer", "description": "optional timeout in seconds (default 60, max 300)" },
            },
            "required": ["command"],
        })
    }

    async fn execute(&self, args: &[Value]) -> anyhow::Result<ToolResult> {
        let command = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("'command' argument is required"))?;

        let timeout: u64 = args
            .get(1)
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT)
            .min(MAX_TIMEOUT);

        info!(command, timeout, "executing shell command");

        if let Some(pattern) = self.is_blocked(command) {
            warn!(pattern, "blocked dangerous command pattern");
            return Ok(ToolResult::error(format!(
                "command blocked: contains dangerous pattern '{pattern}'"
            )));
        }

        std::fs::create_dir_all(&self.workspace).ok();

        let command = command.to_string();
        let workspace = self.workspace.clone();
        let run = tokio::task::spawn_blocking(move || {
            Command::new("bash")
                .args(["-c", &command])
                .current_dir(&workspace)
                .env("HOME", &workspace)
                .env("PWD", &workspace)
                .output()
        });

        let output = match tokio::time::timeout(
            std::time::Duration::from_secs(timeout),
            run,
        )
        .await
        {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(err))) => {
                return Ok(ToolResult::error(format!("failed to execute command: {err}")))
            }
            Ok(Err(join_err)) => {
                return Ok(ToolResult::error(format!("command task failed: {join_err}")))
            }
            Err(_) => return Ok(ToolResult::error(format!("command timed out after {timeout}s"))),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(format!("STDOUT:\n{}", stdout.trim()));
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{}", stderr.trim()));
        }
        parts.push(format!("EXIT CODE: {exit_code}"));

        let rendered = self.truncate_output(parts.join("\n\n"));
        debug!(exit_code, "shell command completed");

        if output.status.success() {
            Ok(ToolResult::success(rendered))
        } else {
            Ok(ToolResult::error(rendered))
        }
    }
}
