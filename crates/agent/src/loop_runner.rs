//! The agent streaming loop implementation.

use std::sync::Arc;

use deckhand_config::DEFAULT_SYSTEM_PROMPT;
use deckhand_core::error::{AgentError, ProviderError, ToolError};
use deckhand_core::message::{ContentBlock, Conversation, Message};
use deckhand_core::provider::{FinalMessage, Provider, ProviderRequest, StreamChunk};
use deckhand_core::tool::{ToolRegistry, render_output};
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::stream_event::{AgentStreamEvent, ToolCallStatus};
use crate::summary::tool_summary;
use crate::usage::UsageMonitor;

/// Default max tokens per provider call.
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Default number of tool rounds one user turn may run.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 25;

/// The agent loop: owns one conversation and drives it through provider
/// rounds and tool dispatch until the model stops asking for tools.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Max tokens per provider call
    max_tokens: u32,

    /// System prompt, sent alongside every request
    system_prompt: String,

    /// Tool registry; without one the model is offered no tools
    tools: Option<Arc<ToolRegistry>>,

    /// Tool rounds allowed per user turn
    max_tool_iterations: u32,

    /// Token accounting, absent for sub-agents
    usage: Option<UsageMonitor>,

    conversation: Conversation,
}

impl AgentLoop {
    /// Create a new agent loop with an empty conversation and no tools.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tools: None,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            usage: Some(UsageMonitor::new()),
            conversation: Conversation::new(),
        }
    }

    /// Set the max tokens per provider call.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Attach a tool registry; its definitions are sent with every request.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Cap the tool rounds of one user turn. Zero is treated as one.
    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max.max(1);
        self
    }

    /// Disable token accounting.
    pub fn without_usage_monitor(mut self) -> Self {
        self.usage = None;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Start over with an empty conversation.
    pub fn reset_conversation(&mut self) {
        self.conversation = Conversation::new();
    }

    pub fn usage(&self) -> Option<&UsageMonitor> {
        self.usage.as_ref()
    }

    pub fn tools(&self) -> Option<&Arc<ToolRegistry>> {
        self.tools.as_ref()
    }

    /// Run one user turn to completion, forwarding events as they happen.
    ///
    /// Returns once the model answers without requesting tools. Provider
    /// failures are translated into [`AgentError`] after the conversation has
    /// been restored to a consistent state; tool failures never surface here.
    /// A dropped event receiver does not stop the turn.
    ///
    /// When the model asks for tools again after `max_tool_iterations`
    /// rounds, those calls are answered with error results without running
    /// and the turn ends with [`AgentError::ToolRoundLimit`].
    pub async fn stream_message(
        &mut self,
        content: &str,
        events: mpsc::Sender<AgentStreamEvent>,
    ) -> Result<(), AgentError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AgentError::EmptyInput);
        }

        info!(
            conversation_id = %self.conversation.id,
            messages = self.conversation.len(),
            "Processing user message"
        );

        let checkpoint = self.conversation.len();
        self.conversation.push(Message::user(content));

        let mut round = 0u32;
        loop {
            round += 1;
            debug!(conversation_id = %self.conversation.id, round, "Agent loop round");

            let mut streamed = String::new();
            let final_message = match self.stream_round(&events, &mut streamed).await {
                Ok(message) => message,
                Err(e) => return Err(self.recover(e, checkpoint, streamed)),
            };

            if let (Some(usage), Some(reported)) = (self.usage.as_mut(), final_message.usage) {
                usage.record(reported);
            }

            let requests_tools = final_message.requests_tools();
            let tool_uses: Vec<(String, String, serde_json::Value)> = final_message
                .tool_uses()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            self.conversation.push(Message::assistant_blocks(final_message.content));

            let Some(registry) = self.tools.clone() else {
                return Ok(());
            };
            if !requests_tools || tool_uses.is_empty() {
                return Ok(());
            }

            if round > self.max_tool_iterations {
                let limit = self.max_tool_iterations;
                warn!(
                    conversation_id = %self.conversation.id,
                    limit,
                    "Tool round limit reached, ending turn"
                );
                let refused = tool_uses
                    .iter()
                    .map(|(id, _, _)| {
                        ContentBlock::tool_error(
                            id.clone(),
                            format!("Not run: limit of {limit} tool rounds per turn reached"),
                        )
                    })
                    .collect();
                self.conversation.push(Message::tool_results(refused));
                return Err(AgentError::ToolRoundLimit(limit));
            }

            if !streamed.is_empty() {
                let _ = events.send(AgentStreamEvent::PreambleEnd).await;
            }

            let results = dispatch(&registry, &tool_uses, &events).await;
            self.conversation.push(Message::tool_results(results));
        }
    }

    /// Drive a turn and return only the concatenated text fragments.
    pub async fn collect_text(&mut self, content: &str) -> Result<String, AgentError> {
        let (tx, mut rx) = mpsc::channel(64);
        let collect = async {
            let mut text = String::new();
            while let Some(event) = rx.recv().await {
                if let AgentStreamEvent::Text { content } = event {
                    text.push_str(&content);
                }
            }
            text
        };
        let (outcome, text) = tokio::join!(self.stream_message(content, tx), collect);
        outcome.map(|()| text)
    }

    /// One provider call: forward text fragments and wait for the final message.
    async fn stream_round(
        &self,
        events: &mpsc::Sender<AgentStreamEvent>,
        streamed: &mut String,
    ) -> Result<FinalMessage, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: self.conversation.messages.clone(),
            system: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
            tools: self
                .tools
                .as_ref()
                .map(|t| t.definitions())
                .unwrap_or_default(),
        };

        let mut stream = self.provider.stream(request).await?;
        while let Some(chunk) = stream.recv().await {
            match chunk? {
                StreamChunk::Text(fragment) => {
                    streamed.push_str(&fragment);
                    let _ = events
                        .send(AgentStreamEvent::Text { content: fragment })
                        .await;
                }
                StreamChunk::Final(message) => return Ok(message),
            }
        }

        Err(ProviderError::Connection(
            "Stream closed before the final message".into(),
        ))
    }

    /// Restore the conversation after a provider failure and translate the error.
    ///
    /// Everything this call appended is dropped, except that a transport
    /// failure after partial text keeps that text as an assistant turn.
    fn recover(&mut self, err: ProviderError, checkpoint: usize, streamed: String) -> AgentError {
        let keep_partial = matches!(
            err,
            ProviderError::Timeout(_) | ProviderError::Connection(_)
        ) && !streamed.is_empty();

        if keep_partial {
            self.conversation.push(Message::assistant(streamed));
        } else {
            self.conversation.truncate(checkpoint);
        }

        error!(
            conversation_id = %self.conversation.id,
            provider = self.provider.name(),
            error = %err,
            kept_partial = keep_partial,
            "Provider call failed"
        );
        AgentError::from(err)
    }
}

/// Run every tool-use block of one assistant turn concurrently.
///
/// All `started` events go out before anything executes; outcomes are
/// reported and returned in block order.
async fn dispatch(
    registry: &ToolRegistry,
    tool_uses: &[(String, String, serde_json::Value)],
    events: &mpsc::Sender<AgentStreamEvent>,
) -> Vec<ContentBlock> {
    info!(tool_count = tool_uses.len(), "Dispatching tool calls");

    let summaries: Vec<String> = tool_uses
        .iter()
        .map(|(_, name, input)| tool_summary(name, input))
        .collect();
    for ((_, name, _), summary) in tool_uses.iter().zip(&summaries) {
        let _ = events
            .send(AgentStreamEvent::tool_call(name, ToolCallStatus::Started, summary))
            .await;
    }

    let outcomes: Vec<Result<serde_json::Value, ToolError>> = join_all(
        tool_uses
            .iter()
            .map(|(_, name, input)| registry.execute(name, input.clone())),
    )
    .await;

    let mut results = Vec::with_capacity(tool_uses.len());
    for (((id, name, _), summary), outcome) in tool_uses.iter().zip(summaries).zip(outcomes) {
        match outcome {
            Ok(value) => {
                let _ = events
                    .send(AgentStreamEvent::tool_call(name, ToolCallStatus::Completed, &summary))
                    .await;
                results.push(ContentBlock::tool_result(id, render_output(&value)));
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                let message = e.to_string();
                let _ = events
                    .send(AgentStreamEvent::ToolCall {
                        name: name.clone(),
                        status: ToolCallStatus::Failed,
                        summary,
                        error: Some(message.clone()),
                    })
                    .await;
                results.push(ContentBlock::tool_error(id, message));
            }
        }
    }
    results
}
