//! Tool trait and registry — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! read and edit files, run shell commands, delegate to a sub-agent.
//! Every invocation goes through [`ToolRegistry::execute`], which applies
//! per-resource locking and paginates oversized results.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::ToolError;
use crate::lock::LockProvider;
use crate::pagination::{DEFAULT_MAX_RESULT_CHARS, PaginationError, ResultPages};
use crate::provider::ToolDefinition;

/// Where a tool came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    #[default]
    Native,
    Skill,
    Mcp,
}

impl std::fmt::Display for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Skill => f.write_str("skill"),
            Self::Mcp => f.write_str("mcp"),
        }
    }
}

/// Context handed to a tool for one invocation.
pub struct ToolContext<'a> {
    /// The registry dispatching this call.
    pub registry: &'a ToolRegistry,
}

/// The core Tool trait.
///
/// Tools are registered in the [`ToolRegistry`] and made available to the
/// agent loop. A tool returns any JSON value; the registry turns it into text
/// when it is sent back to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// The argument naming the resource this tool touches, if any.
    ///
    /// When set, calls are serialized per value of that argument.
    fn file_param(&self) -> Option<&str> {
        None
    }

    /// Whether oversized output should be paginated.
    fn paginates(&self) -> bool {
        true
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

type Handler =
    dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, ToolError>> + Send + Sync;

/// A tool built from a closure.
///
/// Useful for small tools and for tests; larger tools implement [`Tool`]
/// directly.
pub struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    file_param: Option<String>,
    handler: Arc<Handler>,
}

impl FnTool {
    /// Build a tool from an async handler.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            file_param: None,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Build a tool from a synchronous handler.
    pub fn from_sync<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value, ToolError> + Send + Sync + 'static,
    {
        Self::new(name, description, schema, move |args| {
            futures::future::ready(handler(args))
        })
    }

    /// Name the argument that identifies the resource to lock.
    pub fn with_file_param(mut self, param: impl Into<String>) -> Self {
        self.file_param = Some(param.into());
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn file_param(&self) -> Option<&str> {
        self.file_param.as_deref()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext<'_>,
    ) -> Result<serde_json::Value, ToolError> {
        (self.handler)(arguments).await
    }
}

/// Render a tool result as the text sent back to the model.
///
/// Strings are passed through; any other value becomes compact JSON.
pub fn render_output(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Name, description and source of a registered tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub source: ToolSource,
}

#[derive(Clone)]
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up and execute tools when the LLM requests them
///
/// The paginated-result store is private to each registry instance, including
/// registries produced by [`ToolRegistry::clone_excluding`].
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    lock_provider: Option<Arc<dyn LockProvider>>,
    pages: Mutex<ResultPages>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            lock_provider: None,
            pages: Mutex::new(ResultPages::new(DEFAULT_MAX_RESULT_CHARS)),
        }
    }

    /// Serialize calls that name the same resource through `provider`.
    pub fn with_lock_provider(mut self, provider: Arc<dyn LockProvider>) -> Self {
        self.lock_provider = Some(provider);
        self
    }

    /// Set the page size for oversized results, in characters.
    pub fn with_max_result_chars(self, max_chars: usize) -> Self {
        let capacity = self.pages().capacity();
        Self {
            pages: Mutex::new(ResultPages::new(max_chars).with_capacity(capacity)),
            ..self
        }
    }

    /// Bound the number of stored paginated results (`None` = unbounded).
    pub fn with_max_paginated_results(self, capacity: Option<usize>) -> Self {
        let max_chars = self.max_result_chars();
        Self {
            pages: Mutex::new(ResultPages::new(max_chars).with_capacity(capacity)),
            ..self
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool. Replaces any existing tool with the same name.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool_name = %name, file_param = ?tool.file_param(), "Tool registered");
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                source: ToolSource::Native,
            },
        );
    }

    /// Change the source tag of a registered tool.
    pub fn set_tool_source(&mut self, name: &str, source: ToolSource) -> Result<(), ToolError> {
        let entry = self
            .tools
            .get_mut(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        entry.source = source;
        Ok(())
    }

    /// A new registry with every tool except those named in `exclude`.
    ///
    /// Tools are shared by reference, so the clone reaches the same sandbox
    /// and side effects. The lock provider and page size carry over; the
    /// paginated-result store starts empty.
    pub fn clone_excluding(&self, exclude: &[&str]) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| !exclude.contains(&name.as_str()))
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();
        let pages = self.pages();
        ToolRegistry {
            tools,
            lock_provider: self.lock_provider.clone(),
            pages: Mutex::new(ResultPages::new(pages.max_chars()).with_capacity(pages.capacity())),
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|entry| entry.tool.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|entry| entry.tool.to_definition()).collect()
    }

    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.tools
            .values()
            .map(|entry| ToolSummary {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                source: entry.source,
            })
            .collect()
    }

    /// Execute a tool by name.
    ///
    /// Holds the lock for the tool's `file_param` value (if any) for the
    /// duration of the handler, then paginates the result if it is too long.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let tool = Arc::clone(&entry.tool);
        debug!(tool_name = %name, arguments = %arguments, "Executing tool");

        let guard = match (&self.lock_provider, lock_key(tool.as_ref(), &arguments)) {
            (Some(provider), Some(key)) => {
                let guard = provider.acquire(&key).await;
                debug!(lock_key = %key, "File lock acquired");
                Some((guard, key))
            }
            _ => None,
        };

        let ctx = ToolContext { registry: self };
        let result = tool.execute(arguments, &ctx).await;

        if let Some((guard, key)) = guard {
            drop(guard);
            debug!(lock_key = %key, "File lock released");
        }

        let result = result?;
        if !tool.paginates() {
            return Ok(result);
        }
        Ok(self.maybe_paginate(result))
    }

    /// Fetch one page of a previously paginated result.
    pub fn read_more(&self, result_id: &str, page: usize) -> Result<String, PaginationError> {
        self.pages().read(result_id, page)
    }

    pub fn max_result_chars(&self) -> usize {
        self.pages().max_chars()
    }

    pub fn paginated_result_count(&self) -> usize {
        self.pages().len()
    }

    pub fn last_result_id(&self) -> Option<String> {
        self.pages().last_result_id().map(str::to_string)
    }

    pub fn clear_paginated_results(&self) {
        self.pages().clear();
    }

    fn maybe_paginate(&self, result: serde_json::Value) -> serde_json::Value {
        let text = render_output(&result);
        let mut pages = self.pages();
        if !pages.needs_pagination(&text) {
            return result;
        }
        serde_json::Value::String(pages.paginate(text))
    }

    fn pages(&self) -> MutexGuard<'_, ResultPages> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The lock key for a call: the value of the tool's `file_param` argument.
fn lock_key(tool: &dyn Tool, arguments: &serde_json::Value) -> Option<String> {
    let value = arguments.get(tool.file_param()?)?;
    let key = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => return None,
        other => other.to_string(),
    };
    (!key.is_empty()).then_some(key)
}
