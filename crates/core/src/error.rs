//! Error types for the Deckhand domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the agent loop translates
//! provider failures into its own [`AgentError`] taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Failures reported by an LLM provider, either when opening the stream or
/// mid-stream.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("API request failed: {message} (status: {status_code})")]
    Status { status_code: u16, message: String },

    #[error("Malformed provider response: {0}")]
    Protocol(String),
}

/// Failures raised while dispatching or running a tool.
///
/// Every variant is absorbed by the agent loop and turned into an
/// error-flagged tool result; none of them abort a conversation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Sandbox violation: {0}")]
    Sandbox(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout:?}")]
    Timeout { tool_name: String, timeout: Duration },
}

/// Errors that propagate out of `AgentLoop::stream_message`.
///
/// Only input validation, provider-level failures and the tool round limit
/// ever surface here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Message must not be empty")]
    EmptyInput,

    #[error("Invalid or expired API credentials: {0}")]
    Credentials(String),

    #[error("Streaming response timed out: {0}")]
    Timeout(String),

    #[error("Streaming connection interrupted: {0}")]
    Connection(String),

    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Stopped after {0} tool rounds without a final answer")]
    ToolRoundLimit(u32),
}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::AuthenticationFailed(msg) => Self::Credentials(msg),
            ProviderError::Timeout(msg) => Self::Timeout(msg),
            ProviderError::Connection(msg) => Self::Connection(msg),
            ProviderError::Status {
                status_code,
                message,
            } => Self::Provider {
                status: status_code,
                message,
            },
            ProviderError::Protocol(message) => Self::Provider { status: 0, message },
        }
    }
}
