//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what a UI or CLI sees while a turn runs: text
//! fragments as the model produces them, interleaved with tool progress.

use serde::{Deserialize, Serialize};

/// Progress of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Started,
    Completed,
    Failed,
}

/// Events emitted by the agent during streaming execution.
///
/// - `text`         — partial text token from the LLM
/// - `tool_call`    — a tool started, completed or failed
/// - `preamble_end` — text streamed so far was the preamble to a tool round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the LLM.
    Text { content: String },

    /// Tool progress, with a human-readable summary of the call.
    ToolCall {
        name: String,
        status: ToolCallStatus,
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Marks the boundary between streamed text and the tool round it introduced.
    PreambleEnd,
}

impl AgentStreamEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolCall { .. } => "tool_call",
            Self::PreambleEnd => "preamble_end",
        }
    }

    pub(crate) fn tool_call(name: &str, status: ToolCallStatus, summary: &str) -> Self {
        Self::ToolCall {
            name: name.to_string(),
            status,
            summary: summary.to_string(),
            error: None,
        }
    }
}
