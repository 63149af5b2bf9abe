//! Directory listing tool.

use async_trait::async_trait;
use deckhand_core::error::ToolError;
use deckhand_core::tool::{Tool, ToolContext};
use deckhand_sandbox::Sandbox;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::parse_args;

/// Directories skipped unless the caller passes its own `exclude_dirs`.
const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
];

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(default = "default_path")]
    path: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    exclude_dirs: Option<Vec<String>>,
    #[serde(default)]
    show_hidden: bool,
}

fn default_path() -> String {
    ".".into()
}

struct Walk {
    root: PathBuf,
    max_depth: Option<usize>,
    pattern: Option<glob::Pattern>,
    exclude_dirs: Vec<String>,
    show_hidden: bool,
    files: Vec<String>,
    directories: Vec<String>,
}

impl Walk {
    fn visit(&mut self, dir: &Path, depth: usize) -> std::io::Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.show_hidden && name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let relative = self.relative(&path);

            // Symlinks are listed but never followed.
            if entry.file_type()?.is_dir() {
                if self.exclude_dirs.iter().any(|d| d == &name) {
                    continue;
                }
                self.directories.push(relative);
                if self.max_depth.is_none_or(|max| depth < max) {
                    self.visit(&path, depth + 1)?;
                }
            } else if self.pattern.as_ref().is_none_or(|p| p.matches(&name)) {
                self.files.push(relative);
            }
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

pub struct ListFilesTool {
    sandbox: Arc<Sandbox>,
}

impl ListFilesTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files and sub-directories of a directory in the project.\n\n\
         Use this to explore the project structure or find files by name pattern \
         before reading or editing them."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path, relative to the project root (defaults to \".\")"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "List sub-directories recursively (default false)"
                },
                "max_depth": {
                    "type": "integer",
                    "description": "Maximum recursion depth when recursive is true (default unlimited)"
                },
                "pattern": {
                    "type": "string",
                    "description": "File name glob such as \"*.py\" or \"test_*.rs\" (default all files)"
                },
                "exclude_dirs": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Directory names to skip, e.g. [\"node_modules\", \".git\"]"
                },
                "show_hidden": {
                    "type": "boolean",
                    "description": "Include entries whose name starts with \".\" (default false)"
                }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext<'_>,
    ) -> Result<serde_json::Value, ToolError> {
        let args: ListFilesArgs = parse_args(arguments)?;
        let resolved = self.sandbox.validate_path(&args.path)?;

        if !resolved.exists() {
            return Err(failed(format!("Directory not found: {}", args.path)));
        }
        if !resolved.is_dir() {
            return Err(failed(format!("Path is not a directory: {}", args.path)));
        }

        let pattern = args
            .pattern
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid pattern: {e}")))?;

        let mut walk = Walk {
            root: self.sandbox.root().to_path_buf(),
            max_depth: if args.recursive { args.max_depth } else { Some(1) },
            pattern,
            exclude_dirs: args.exclude_dirs.unwrap_or_else(|| {
                DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect()
            }),
            show_hidden: args.show_hidden,
            files: Vec::new(),
            directories: Vec::new(),
        };

        let walk = tokio::task::spawn_blocking(move || {
            walk.visit(&resolved, 1).map(|_| walk)
        })
        .await
        .map_err(|e| failed(e.to_string()))?
        .map_err(|e| failed(format!("Failed to list {}: {e}", args.path)))?;

        debug!(
            path = %args.path,
            files = walk.files.len(),
            directories = walk.directories.len(),
            "Directory listed"
        );
        Ok(serde_json::json!({
            "path": args.path,
            "files": walk.files,
            "directories": walk.directories,
        }))
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "list_files".into(),
        reason,
    }
}
