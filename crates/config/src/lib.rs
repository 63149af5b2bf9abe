//! Configuration loading, validation, and management for Deckhand.
//!
//! Loads configuration from `~/.deckhand/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default system prompt for the top-level agent.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an expert software development assistant working inside a project directory.

Guidelines:
- For complex tasks, understand the request first, then work step by step
- Read the relevant files before changing them
- Explain your reasoning and the choices you make
- When something is unclear, ask the user";

/// Default system prompt for delegated sub-agents.
pub const DEFAULT_SUBAGENT_SYSTEM_PROMPT: &str = "\
You are a sub-agent responsible for completing one assigned task.

Rules:
- Focus on completing the assigned task
- When finished, give a concise summary of the result
- Use the available tools to get the task done";

/// The root configuration structure.
///
/// Maps directly to `~/.deckhand/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool and sandbox settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Connection settings for the Anthropic Messages API.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Whole-request timeout for one streamed response
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_subagent_system_prompt")]
    pub subagent_system_prompt: String,

    /// Register the `create_subagent` tool
    #[serde(default)]
    pub enable_subagent: bool,

    /// Tool rounds one user turn may run before it is stopped
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}
fn default_subagent_system_prompt() -> String {
    DEFAULT_SUBAGENT_SYSTEM_PROMPT.into()
}
fn default_max_tool_iterations() -> u32 {
    25
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            subagent_system_prompt: default_subagent_system_prompt(),
            enable_subagent: false,
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory every file path and command is confined to
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,

    /// Tool output longer than this (in characters) is paginated
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,

    /// Cap on stored paginated results; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_paginated_results: Option<usize>,

    /// Default `bash` timeout when the model does not pass one
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,

    /// Serialize tool calls that touch the same file
    #[serde(default = "default_true")]
    pub enable_file_locks: bool,

    /// Commands the `bash` tool refuses to run
    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_max_result_chars() -> usize {
    30_000
}
fn default_exec_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}
fn default_blocked_commands() -> Vec<String> {
    [
        "rm -rf /",
        "rm -rf ~",
        "sudo",
        "su",
        "mkfs",
        "dd",
        "shutdown",
        "reboot",
        "halt",
        ":(){",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            sandbox_root: default_sandbox_root(),
            max_result_chars: default_max_result_chars(),
            max_paginated_results: None,
            exec_timeout_secs: default_exec_timeout_secs(),
            enable_file_locks: true,
            blocked_commands: default_blocked_commands(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.deckhand/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `ANTHROPIC_API_KEY`
    /// - `DECKHAND_MODEL`
    /// - `DECKHAND_SANDBOX_ROOT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides read through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("ANTHROPIC_API_KEY").filter(|k| !k.is_empty()) {
            self.provider.api_key = Some(key);
        }
        if let Some(model) = lookup("DECKHAND_MODEL").filter(|m| !m.is_empty()) {
            self.provider.model = model;
        }
        if let Some(root) = lookup("DECKHAND_SANDBOX_ROOT").filter(|r| !r.is_empty()) {
            self.tools.sandbox_root = PathBuf::from(root);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deckhand")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("provider.model must not be empty".into()));
        }
        if self.provider.max_tokens == 0 {
            return Err(ConfigError::ValidationError("provider.max_tokens must be > 0".into()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::ValidationError("provider.timeout_secs must be > 0".into()));
        }
        if self.tools.max_result_chars == 0 {
            return Err(ConfigError::ValidationError("tools.max_result_chars must be > 0".into()));
        }
        if self.tools.exec_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("tools.exec_timeout_secs must be > 0".into()));
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError("agent.max_tool_iterations must be > 0".into()));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
