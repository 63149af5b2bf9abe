//! Sub-agent delegation.
//!
//! `create_subagent` hands a self-contained task to a fresh agent loop that
//! shares the provider and the parent's tools, minus delegation itself. The
//! child cannot spawn children of its own, so recursion depth is bounded by
//! construction rather than by a counter.

use std::sync::Arc;

use async_trait::async_trait;
use deckhand_config::{AppConfig, DEFAULT_SUBAGENT_SYSTEM_PROMPT};
use deckhand_core::error::ToolError;
use deckhand_core::provider::Provider;
use deckhand_core::tool::{Tool, ToolContext};
use serde::Deserialize;
use tracing::info;

use crate::loop_runner::{AgentLoop, DEFAULT_MAX_TOKENS, DEFAULT_MAX_TOOL_ITERATIONS};

/// Name under which the delegation tool is registered.
pub const SUBAGENT_TOOL_NAME: &str = "create_subagent";

/// Characters of the task logged when a sub-agent starts.
const TASK_PREVIEW_CHARS: usize = 100;

/// Settings each child loop is built with.
#[derive(Debug, Clone)]
pub struct SubagentSettings {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub max_tool_iterations: u32,
}

impl SubagentSettings {
    /// Inherit model, token limit and tool round limit from the parent's
    /// configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            max_tokens: config.provider.max_tokens,
            system_prompt: config.agent.subagent_system_prompt.clone(),
            max_tool_iterations: config.agent.max_tool_iterations,
        }
    }

    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SUBAGENT_SYSTEM_PROMPT.to_string(),
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubagentArgs {
    task: String,
}

/// Delegates a task to an isolated child agent and returns its final text.
pub struct SubagentTool {
    provider: Arc<dyn Provider>,
    settings: SubagentSettings,
}

impl SubagentTool {
    pub fn new(provider: Arc<dyn Provider>, settings: SubagentSettings) -> Self {
        Self { provider, settings }
    }
}

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        SUBAGENT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a sub-agent with its own fresh conversation.\n\n\
         The sub-agent has the same file and command tools as you but cannot delegate \
         further. It sees only the task text, so include every detail it needs. \
         Only its final answer is returned."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete description of the task for the sub-agent"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<serde_json::Value, ToolError> {
        let args: SubagentArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.task.trim().is_empty() {
            return Err(ToolError::InvalidArguments("task must not be empty".into()));
        }

        let preview: String = args.task.chars().take(TASK_PREVIEW_CHARS).collect();
        info!(task = %preview, "Sub-agent started");

        let tools = Arc::new(ctx.registry.clone_excluding(&[SUBAGENT_TOOL_NAME]));
        let mut child = AgentLoop::new(Arc::clone(&self.provider), self.settings.model.clone())
            .with_max_tokens(self.settings.max_tokens)
            .with_system_prompt(self.settings.system_prompt.clone())
            .with_max_tool_iterations(self.settings.max_tool_iterations)
            .with_tools(tools)
            .without_usage_monitor();

        let result = child
            .collect_text(&args.task)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: SUBAGENT_TOOL_NAME.into(),
                reason: e.to_string(),
            })?;

        info!(result_chars = result.chars().count(), "Sub-agent finished");
        Ok(serde_json::json!({ "result": result }))
    }
}
