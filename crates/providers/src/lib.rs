//! LLM Provider implementations for Deckhand.
//!
//! All providers implement the `deckhand_core::Provider` trait.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
