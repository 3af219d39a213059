//! Tool Trait and Registry
//!
//! Split definition/execution traits for tools the model may call:
//!
//! - `ToolDefinitionTrait` - identity, schema, and how the call must be run
//!   (inline, approval-gated, or deferred to an external queue)
//! - `ToolExecutable` - the handler itself
//! - `Tool` - combined trait (blanket impl)
//! - `ToolRegistry` - O(1) lookup by name or class with ordered iteration
//! - `FunctionTool` - closure-backed tool for simple handlers

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ToolContext;
use crate::error::{CoreError, CoreResult};

// ============================================================================
// Trait Definitions
// ============================================================================

/// Where a tool's handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run in the invocation loop as soon as the call is parsed.
    #[default]
    Inline,
    /// Hand `(class, arguments, call id)` to an external queue; the loop
    /// returns a pending placeholder and the worker resumes it later.
    Deferred,
}

/// Tool definition metadata.
pub trait ToolDefinitionTrait: Send + Sync {
    /// Unique name the model uses to call this tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Stable class identifier used when a deferred job is serialized and
    /// later resumed by a worker. Defaults to the tool name.
    fn class_name(&self) -> &str {
        self.name()
    }

    /// Whether a human must approve each call before the handler runs.
    fn requires_approval(&self) -> bool {
        false
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Inline
    }
}

/// Tool execution trait.
#[async_trait]
pub trait ToolExecutable: Send + Sync {
    /// Execute the tool with the parsed arguments object.
    async fn execute(&self, ctx: &ToolContext, args: Value) -> CoreResult<Value>;
}

/// Combined trait for tools that provide both definition and execution.
pub trait Tool: ToolDefinitionTrait + ToolExecutable {}

impl<T: ToolDefinitionTrait + ToolExecutable> Tool for T {}

// ============================================================================
// ToolRegistry
// ============================================================================

/// Registry of tools keyed by name, with a secondary class-name index for
/// resuming deferred jobs.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    classes: HashMap<String, String>,
    /// Insertion order for deterministic iteration.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of tools.
    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.classes
            .insert(tool.class_name().to_string(), name.clone());
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Look up a tool by its class name (falls back to the tool name).
    pub fn get_by_class(&self, class_name: &str) -> Option<Arc<dyn Tool>> {
        self.classes
            .get(class_name)
            .and_then(|name| self.tools.get(name))
            .or_else(|| self.tools.get(class_name))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Tools in registration order.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name, bypassing approval and deferral.
    ///
    /// Returns `Err(CoreError::NotFound)` if the tool is not registered.
    pub async fn execute(&self, name: &str, ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(ctx, args).await,
            None => Err(CoreError::not_found(format!("Tool not found: {}", name))),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

// ============================================================================
// FunctionTool
// ============================================================================

type BoxedHandler = Arc<
    dyn Fn(ToolContext, Value) -> Pin<Box<dyn Future<Output = CoreResult<Value>> + Send>>
        + Send
        + Sync,
>;

/// A tool backed by an async closure.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    class_name: String,
    description: String,
    schema: Value,
    requires_approval: bool,
    mode: ExecutionMode,
    handler: BoxedHandler,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<Value>> + Send + 'static,
    {
        let name = name.into();
        Self {
            class_name: name.clone(),
            name,
            description: description.into(),
            schema,
            requires_approval: false,
            mode: ExecutionMode::Inline,
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }

    /// Require a recorded approval before each call runs.
    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Run the handler out-of-process via the deferred queue.
    pub fn deferred(mut self) -> Self {
        self.mode = ExecutionMode::Deferred;
        self
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }
}

impl ToolDefinitionTrait for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }
}

#[async_trait]
impl ToolExecutable for FunctionTool {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        (self.handler)(ctx.clone(), args).await
    }
}

// ============================================================================
// Tests
// ============================================================================
