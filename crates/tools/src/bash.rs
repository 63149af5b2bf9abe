//! Bash tool — run shell commands in the sandbox.
//!
//! Supports a command denial list, sub-directory working dirs, and timeout.

use async_trait::async_trait;
use deckhand_core::error::ToolError;
use deckhand_core::tool::{Tool, ToolContext};
use deckhand_sandbox::{Sandbox, SandboxError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::parse_args;

#[derive(Debug, Deserialize)]
struct BashArgs {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    working_dir: Option<String>,
}

/// Execute shell commands with safety constraints.
pub struct BashTool {
    sandbox: Arc<Sandbox>,
    default_timeout: Duration,
    /// Commands (or multi-word fragments) that are refused outright.
    blocked_commands: Vec<String>,
}

impl BashTool {
    pub fn new(sandbox: Arc<Sandbox>, default_timeout: Duration, blocked_commands: Vec<String>) -> Self {
        Self {
            sandbox,
            default_timeout,
            blocked_commands,
        }
    }

    /// The denial-list entry `command` matches, if any.
    ///
    /// Single-word entries match any word of the command, so `sudo` also
    /// catches `ls && sudo rm`. Entries with spaces match as a substring of
    /// the whitespace-normalised command.
    fn blocked_by(&self, command: &str) -> Option<&str> {
        let normalized = command.split_whitespace().collect::<Vec<_>>().join(" ");
        let words: Vec<&str> = command
            .split(|c: char| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '(' | ')' | '`'))
            .filter(|w| !w.is_empty())
            .collect();

        self.blocked_commands
            .iter()
            .find(|blocked| {
                if blocked.contains(char::is_whitespace) || !blocked.chars().all(char::is_alphanumeric) {
                    normalized.contains(blocked.as_str())
                } else {
                    words.iter().any(|w| *w == blocked.as_str())
                }
            })
            .map(String::as_str)
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a bash command in the project directory.\n\n\
         Common uses: running tests (cargo test, pytest, npm test), linters and \
         formatters, package managers, git (status, diff, log), and exploring files.\n\n\
         Commands run inside the project directory only; dangerous or system-level \
         commands (rm -rf /, sudo, ...) are refused.\n\n\
         Returns the exit code, stdout and stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": format!("Timeout in seconds (default {})", self.default_timeout.as_secs())
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory, relative to the project root (optional)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext<'_>,
    ) -> Result<serde_json::Value, ToolError> {
        let args: BashArgs = parse_args(arguments)?;

        if let Some(blocked) = self.blocked_by(&args.command) {
            warn!(command = %args.command, blocked, "Blocked command");
            return Err(ToolError::PermissionDenied {
                tool_name: "bash".into(),
                reason: format!("Command matches blocked pattern '{blocked}'"),
            });
        }

        let timeout = args
            .timeout
            .filter(|t| *t > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        debug!(command = %args.command, ?timeout, "Executing bash command");

        let result = self
            .sandbox
            .exec(&args.command, timeout, args.working_dir.as_deref())
            .await
            .map_err(|e| match e {
                SandboxError::ExecutionTimeout { timeout, .. } => ToolError::Timeout {
                    tool_name: "bash".into(),
                    timeout,
                },
                other => other.into(),
            })?;

        if result.exit_code != 0 {
            debug!(command = %args.command, exit_code = result.exit_code, "Command exited non-zero");
        }

        serde_json::to_value(result).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "bash".into(),
            reason: e.to_string(),
        })
    }
}
