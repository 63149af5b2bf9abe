//! Provider trait — the abstraction over LLM backends.
//!
//! The agent loop treats the provider as an opaque streaming RPC: it sends the
//! full conversation, a system prompt and the tool definitions, receives text
//! fragments as they are generated, and finally one structured message with
//! the complete content blocks and a stop reason.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{ContentBlock, Message};

/// A streaming request sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// The full conversation so far
    pub messages: Vec<Message>,

    /// System prompt, sent outside the conversation
    pub system: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters, passed through opaquely
    pub input_schema: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

/// Token usage information for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The complete structured message produced at the end of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalMessage {
    /// Every content block, tool-use requests included, in generation order
    pub content: Vec<ContentBlock>,

    /// Why generation stopped
    pub stop_reason: StopReason,

    /// Token usage, if the provider reported it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl FinalMessage {
    /// Whether the model stopped to request tool calls.
    pub fn requests_tools(&self) -> bool {
        self.stop_reason == StopReason::ToolUse
    }

    /// Tool-use blocks as `(id, name, input)` triples, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }
}

/// One item of a provider stream.
///
/// A well-formed stream is zero or more `Text` fragments followed by exactly
/// one `Final`. A failure at any point arrives as an `Err` item instead.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A text fragment, forwarded to the caller as it arrives
    Text(String),

    /// The complete message; always the last item
    Final(FinalMessage),
}

/// Receiving half of a provider stream.
pub type ProviderStream = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The agent loop calls `stream()` without knowing which backend is in use.
/// Failures before the first byte are returned directly; failures after that
/// arrive as an `Err` item on the stream.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Open a streaming generation for the given request.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderStream, ProviderError>;
}
