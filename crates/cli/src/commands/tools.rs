//! `deckhand tools` — List the tools the agent can call.

use std::path::{Path, PathBuf};

use super::{build_registry, load_config};

pub fn run(config_path: Option<&Path>, root: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    // Delegation needs a live provider; it is listed by name only.
    let registry = build_registry(&config, root, None)?;

    println!("Available tools ({}):", registry.len());
    println!();
    for tool in registry.summaries() {
        let headline = tool.description.lines().next().unwrap_or_default();
        println!("  {:<12} [{}]  {headline}", tool.name, tool.source);
    }
    if config.agent.enable_subagent {
        println!("  {:<12} [native]  Delegate a task to a sub-agent", deckhand_agent::SUBAGENT_TOOL_NAME);
    }
    Ok(())
}
