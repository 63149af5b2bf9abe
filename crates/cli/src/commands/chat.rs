//! `deckhand chat` — Interactive or single-message chat mode.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use deckhand_agent::{AgentLoop, AgentStreamEvent, ToolCallStatus};
use deckhand_config::AppConfig;
use deckhand_core::provider::Provider;
use deckhand_providers::AnthropicProvider;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{build_registry, load_config};

pub async fn run(
    config_path: Option<&Path>,
    root: Option<PathBuf>,
    message: Option<String>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    // Check for API key early — give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set the environment variable:");
        eprintln!("    export ANTHROPIC_API_KEY='sk-ant-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        anyhow::bail!("No API key found. See above for setup instructions.");
    }

    let provider: Arc<dyn Provider> = Arc::new(
        AnthropicProvider::from_config(&config.provider).context("Failed to create provider")?,
    );
    let registry = Arc::new(build_registry(&config, root, Some(Arc::clone(&provider)))?);
    let tool_names = registry.names().join(", ");

    let mut agent = AgentLoop::new(provider, config.provider.model.clone())
        .with_max_tokens(config.provider.max_tokens)
        .with_system_prompt(config.agent.system_prompt.clone())
        .with_max_tool_iterations(config.agent.max_tool_iterations)
        .with_tools(registry);

    if let Some(msg) = message {
        // Single message mode
        send(&mut agent, &msg).await?;
        print_usage(&agent);
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        Deckhand — Interactive Mode           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", config.provider.model);
    println!("  Tools:     {tool_names}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  /reset clears the conversation, /exit or Ctrl+D quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/exit" => break,
            "/reset" => {
                agent.reset_conversation();
                println!("  Conversation cleared.");
                continue;
            }
            _ => {}
        }

        println!();
        // Provider errors end the turn, not the session.
        if let Err(e) = send(&mut agent, &line).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    print_usage(&agent);
    println!("  Goodbye!");
    Ok(())
}

/// Run one turn, printing events as they arrive.
async fn send(agent: &mut AgentLoop, message: &str) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(64);
    let (outcome, printed) = tokio::join!(agent.stream_message(message, tx), print_events(rx));
    printed?;
    outcome?;
    println!();
    Ok(())
}

async fn print_events(mut rx: mpsc::Receiver<AgentStreamEvent>) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::Text { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            AgentStreamEvent::PreambleEnd => writeln!(stdout)?,
            AgentStreamEvent::ToolCall {
                status,
                summary,
                error,
                ..
            } => {
                let line = tool_line(status, &summary, error.as_deref());
                writeln!(stdout, "{line}")?;
            }
        }
    }
    Ok(())
}

fn tool_line(status: ToolCallStatus, summary: &str, error: Option<&str>) -> String {
    match status {
        ToolCallStatus::Started => format!("⏺ {summary} …"),
        ToolCallStatus::Completed => format!("  ⎿ {summary} … ok"),
        ToolCallStatus::Failed => {
            format!("  ⎿ {summary} … failed: {}", error.unwrap_or("unknown error"))
        }
    }
}

fn print_usage(agent: &AgentLoop) {
    if let Some(usage) = agent.usage() {
        eprintln!("  Usage: {usage}");
    }
}
