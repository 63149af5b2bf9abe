//! `deckhand init` — Write a default configuration file.

use std::path::Path;

use anyhow::Context;
use deckhand_config::AppConfig;

pub fn run(config_path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };

    if write_default(&path, force)? {
        println!("Wrote default config to {}", path.display());
        println!();
        println!("Next steps:");
        println!("  1. export ANTHROPIC_API_KEY='sk-ant-...'  (or set provider.api_key)");
        println!("  2. deckhand chat --root <project>");
    } else {
        println!("Config already exists at {} (use --force to overwrite)", path.display());
    }
    Ok(())
}

/// Write the default config; returns false if a file exists and `force` is off.
fn write_default(path: &Path, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Config written");
    Ok(true)
}
