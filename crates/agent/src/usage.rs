//! Token usage accounting across provider calls.

use deckhand_core::provider::Usage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Running totals of token usage for one agent loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMonitor {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the usage reported for one provider call.
    pub fn record(&mut self, usage: Usage) {
        self.requests += 1;
        self.input_tokens += u64::from(usage.input_tokens);
        self.output_tokens += u64::from(usage.output_tokens);
        debug!(
            requests = self.requests,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Usage recorded"
        );
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Display for UsageMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} requests, {} input tokens, {} output tokens",
            self.requests, self.input_tokens, self.output_tokens
        )
    }
}
