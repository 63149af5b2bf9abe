//! Subcommand implementations and the wiring they share.

pub mod chat;
pub mod init;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use deckhand_agent::{SubagentSettings, SubagentTool};
use deckhand_config::AppConfig;
use deckhand_core::provider::Provider;
use deckhand_core::tool::ToolRegistry;
use deckhand_sandbox::Sandbox;

/// Load the config file (or the default one), with environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load config")
}

/// Build the tool registry for a project, with delegation when enabled.
///
/// `provider` is only needed for the delegation tool.
pub fn build_registry(
    config: &AppConfig,
    root: Option<PathBuf>,
    provider: Option<Arc<dyn Provider>>,
) -> anyhow::Result<ToolRegistry> {
    let root = root.unwrap_or_else(|| config.tools.sandbox_root.clone());
    let sandbox = Sandbox::new(&root)
        .with_context(|| format!("Cannot use {} as project root", root.display()))?;
    tracing::info!(root = %sandbox.root().display(), "Sandbox ready");

    let mut registry = deckhand_tools::default_registry(Arc::new(sandbox), &config.tools);
    if config.agent.enable_subagent
        && let Some(provider) = provider
    {
        registry.register(SubagentTool::new(provider, SubagentSettings::from_config(config)));
    }
    Ok(registry)
}
