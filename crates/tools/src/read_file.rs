//! File read tool — read file contents inside the sandbox.

use async_trait::async_trait;
use deckhand_core::error::ToolError;
use deckhand_core::tool::{Tool, ToolContext};
use deckhand_sandbox::Sandbox;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::parse_args;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

pub struct ReadFileTool {
    sandbox: Arc<Sandbox>,
}

impl ReadFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the project.\n\n\
         Use this when the user asks to see code, before modifying an existing \
         implementation, or to inspect a file mentioned in an error message.\n\n\
         Returns the file text, its path and the detected language."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the project root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to read, 1-based (optional, defaults to 1)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to read, inclusive (optional, defaults to end of file)"
                }
            },
            "required": ["path"]
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
        let args: ReadFileArgs = parse_args(arguments)?;
        let resolved = self.sandbox.validate_path(&args.path)?;

        if !resolved.exists() {
            return Err(failed(format!("File not found: {}", args.path)));
        }
        if resolved.is_dir() {
            return Err(failed(format!("Path is a directory, not a file: {}", args.path)));
        }

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| failed(format!("Failed to read {}: {e}", args.path)))?;
        let total_lines = content.lines().count();

        let content = match (args.start_line, args.end_line) {
            (None, None) => content,
            (start, end) => select_lines(&content, start.unwrap_or(1), end, total_lines)?,
        };

        debug!(path = %args.path, total_lines, "File read");
        Ok(serde_json::json!({
            "path": args.path,
            "content": content,
            "language": detect_language(&resolved),
            "total_lines": total_lines,
        }))
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "read_file".into(),
        reason,
    }
}

fn select_lines(
    content: &str,
    start: usize,
    end: Option<usize>,
    total_lines: usize,
) -> Result<String, ToolError> {
    let end = end.unwrap_or(total_lines).min(total_lines);
    if start == 0 {
        return Err(ToolError::InvalidArguments("start_line is 1-based".into()));
    }
    if total_lines == 0 {
        return Ok(String::new());
    }
    if start > total_lines {
        return Err(ToolError::InvalidArguments(format!(
            "start_line {start} is past the end of the file ({total_lines} lines)"
        )));
    }
    if end < start {
        return Err(ToolError::InvalidArguments(format!(
            "end_line {end} is before start_line {start}"
        )));
    }
    let selected: Vec<&str> = content.lines().skip(start - 1).take(end - start + 1).collect();
    Ok(selected.join("\n"))
}

/// Language name from the file extension, for the model's benefit.
fn detect_language(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "tsx" => "tsx",
        "jsx" => "jsx",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" | "cxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "sh" | "bash" => "bash",
        "html" | "htm" => "html",
        "css" => "css",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        "sql" => "sql",
        "xml" => "xml",
        _ => "text",
    }
}
