//! File edit tool — create files or replace one exact snippet.
//!
//! Edits are search-and-replace on an exact, unique match so the model must
//! quote what it wants to change; ambiguous or stale edits fail instead of
//! landing in the wrong place.

use async_trait::async_trait;
use deckhand_core::error::ToolError;
use deckhand_core::tool::{Tool, ToolContext};
use deckhand_sandbox::Sandbox;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::parse_args;

#[derive(Debug, Deserialize)]
struct EditFileArgs {
    path: String,
    #[serde(default)]
    old_content: Option<String>,
    new_content: String,
    #[serde(default)]
    create_if_missing: bool,
}

pub struct EditFileTool {
    sandbox: Arc<Sandbox>,
}

impl EditFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Create a new file or edit an existing one.\n\n\
         To edit, pass old_content with the exact text to replace (it must occur \
         exactly once; include surrounding lines to make it unique) and new_content \
         with its replacement. An empty new_content deletes the snippet.\n\n\
         To create a file, set create_if_missing to true and pass the whole file \
         as new_content. Existing files are never overwritten this way."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the project root"
                },
                "old_content": {
                    "type": "string",
                    "description": "Exact text to replace (required when editing an existing file)"
                },
                "new_content": {
                    "type": "string",
                    "description": "Replacement text, or the full content of a new file"
                },
                "create_if_missing": {
                    "type": "boolean",
                    "description": "Create the file if it does not exist (default false)"
                }
            },
            "required": ["path", "new_content"]
        })
    }

    fn file_param(&self) -> Option<&str> {
        Some("path")
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext<'_>,
    ) -> Result<serde_json::Value, ToolError> {
        let args: EditFileArgs = parse_args(arguments)?;
        let resolved = self.sandbox.validate_path(&args.path)?;

        if !resolved.exists() {
            if !args.create_if_missing {
                return Err(failed(format!(
                    "File not found: {} (set create_if_missing to create it)",
                    args.path
                )));
            }
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| failed(format!("Failed to create directories for {}: {e}", args.path)))?;
            }
            tokio::fs::write(&resolved, &args.new_content)
                .await
                .map_err(|e| failed(format!("Failed to write {}: {e}", args.path)))?;

            info!(path = %args.path, bytes = args.new_content.len(), "File created");
            return Ok(serde_json::json!({"path": args.path, "created": true}));
        }

        if resolved.is_dir() {
            return Err(failed(format!("Path is a directory, not a file: {}", args.path)));
        }

        let old = match args.old_content.as_deref() {
            Some(old) if !old.is_empty() => old,
            _ if args.create_if_missing => {
                return Err(failed(format!(
                    "File already exists: {}; pass old_content to edit it",
                    args.path
                )));
            }
            _ => {
                return Err(ToolError::InvalidArguments(
                    "old_content is required to edit an existing file".into(),
                ));
            }
        };

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| failed(format!("Failed to read {}: {e}", args.path)))?;

        match content.matches(old).count() {
            0 => {
                return Err(failed(format!(
                    "old_content not found in {}; read the file again and quote it exactly",
                    args.path
                )));
            }
            1 => {}
            n => {
                return Err(failed(format!(
                    "old_content has multiple matches ({n}) in {}; include more surrounding lines to make it unique",
                    args.path
                )));
            }
        }

        let updated = content.replacen(old, &args.new_content, 1);
        tokio::fs::write(&resolved, updated)
            .await
            .map_err(|e| failed(format!("Failed to write {}: {e}", args.path)))?;

        info!(path = %args.path, "File modified");
        Ok(serde_json::json!({"path": args.path, "modified": true}))
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "edit_file".into(),
        reason,
    }
}
