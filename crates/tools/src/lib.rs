//! Built-in tool implementations for Deckhand.
//!
//! Tools give the agent the ability to work on a project: read, list and
//! edit files, run shell commands, and page through oversized results.
//! Every file path is resolved through the shared [`Sandbox`].

pub mod bash;
pub mod edit_file;
pub mod list_files;
pub mod read_file;
pub mod read_more;

use deckhand_config::ToolsConfig;
use deckhand_core::error::ToolError;
use deckhand_core::lock::KeyedLocks;
use deckhand_core::tool::ToolRegistry;
use deckhand_sandbox::Sandbox;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

pub use bash::BashTool;
pub use edit_file::EditFileTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use read_more::ReadMoreTool;

/// Create a registry holding every built-in tool, bound to `sandbox`.
///
/// Same-file calls are serialized through an in-process [`KeyedLocks`]
/// unless `config.enable_file_locks` is off.
pub fn default_registry(sandbox: Arc<Sandbox>, config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new()
        .with_max_result_chars(config.max_result_chars)
        .with_max_paginated_results(config.max_paginated_results);
    if config.enable_file_locks {
        registry = registry.with_lock_provider(Arc::new(KeyedLocks::new()));
    }

    registry.register(ReadFileTool::new(Arc::clone(&sandbox)));
    registry.register(ListFilesTool::new(Arc::clone(&sandbox)));
    registry.register(EditFileTool::new(Arc::clone(&sandbox)));
    registry.register(BashTool::new(
        sandbox,
        Duration::from_secs(config.exec_timeout_secs),
        config.blocked_commands.clone(),
    ));
    registry.register(ReadMoreTool);

    tracing::info!(tools = ?registry.names(), "Default tool registry created");
    registry
}

/// Deserialize tool arguments into a typed struct.
pub(crate) fn parse_args<T: DeserializeOwned>(arguments: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_registry_has_builtin_tools() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(Sandbox::new(dir.path()).unwrap());
        let registry = default_registry(sandbox, &ToolsConfig::default());

        assert_eq!(
            registry.names(),
            vec!["bash", "edit_file", "list_files", "read_file", "read_more"]
        );
        assert_eq!(registry.get("read_file").unwrap().file_param(), Some("path"));
        assert_eq!(registry.get("edit_file").unwrap().file_param(), Some("path"));
        assert_eq!(registry.get("bash").unwrap().file_param(), None);
        assert!(!registry.get("read_more").unwrap().paginates());
    }

    #[tokio::test]
    async fn oversized_read_pages_through_read_more() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "z".repeat(250)).unwrap();
        let sandbox = Arc::new(Sandbox::new(dir.path()).unwrap());
        let config = ToolsConfig {
            max_result_chars: 100,
            ..ToolsConfig::default()
        };
        let registry = default_registry(sandbox, &config);

        let first = registry
            .execute("read_file", serde_json::json!({"path": "big.txt"}))
            .await
            .unwrap();
        let first = first.as_str().unwrap();
        assert!(first.contains("Output truncated"));

        let id = registry.last_result_id().unwrap();
        let page = registry
            .execute("read_more", serde_json::json!({"result_id": id, "page": 2}))
            .await
            .unwrap();
        let page = page.as_str().unwrap();
        assert!(page.contains("[2/"));
        // A page is never re-paginated.
        assert_eq!(registry.paginated_result_count(), 1);
    }
}
