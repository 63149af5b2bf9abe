//! The agent loop — the heart of Deckhand.
//!
//! Each user message runs through a **Stream → Dispatch → Stream** cycle:
//!
//! 1. **Receive** a user message and append it to the conversation
//! 2. **Stream** the conversation to the provider, forwarding text as it arrives
//! 3. **If tool calls**: run them concurrently, append the results, loop to step 2
//! 4. **Otherwise** the turn is done
//!
//! Provider failures end the turn with an [`AgentError`](deckhand_core::AgentError)
//! after the conversation has been put back into a consistent state.

pub mod loop_runner;
pub mod stream_event;
pub mod subagent;
pub mod summary;
pub mod usage;

pub use loop_runner::{AgentLoop, DEFAULT_MAX_TOKENS, DEFAULT_MAX_TOOL_ITERATIONS};
pub use stream_event::{AgentStreamEvent, ToolCallStatus};
pub use subagent::{SUBAGENT_TOOL_NAME, SubagentSettings, SubagentTool};
pub use summary::tool_summary;
pub use usage::UsageMonitor;
