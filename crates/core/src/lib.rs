//! # Deckhand Core
//!
//! Domain types, traits, and error definitions for the Deckhand coding agent.
//! This crate has **no framework dependencies**: it defines the domain model
//! that the provider, tool and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here. Implementations live in their respective
//! crates. This enables:
//! - Swapping the LLM backend without touching the agent loop
//! - Easy testing with scripted providers and closure-based tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod lock;
pub mod message;
pub mod pagination;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{AgentError, ProviderError, ToolError};
pub use lock::{KeyedLocks, LockGuard, LockProvider};
pub use message::{ContentBlock, Conversation, ConversationId, Message, MessageContent, Role};
pub use pagination::{DEFAULT_MAX_RESULT_CHARS, PaginationError, ResultPages};
pub use provider::{
    FinalMessage, Provider, ProviderRequest, ProviderStream, StopReason, StreamChunk,
    ToolDefinition, Usage,
};
pub use tool::{FnTool, Tool, ToolContext, ToolRegistry, ToolSource, ToolSummary, render_output};
