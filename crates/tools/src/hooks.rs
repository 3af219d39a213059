//! Tool Invocation Hooks
//!
//! Observers called around every real tool execution. Hooks do not fire for
//! calls that are suspended for approval, rejected, or handed to the
//! deferred queue.

use std::sync::Arc;

use modelgate_core::{ToolCall, ToolContext, ToolResult};

/// Called just before a handler runs.
pub type BeforeToolHook = Arc<dyn Fn(&ToolCall, &ToolContext) + Send + Sync>;

/// Called after a handler finishes. The flag is `false` when the handler
/// failed, in which case the result holds the error message.
pub type AfterToolHook = Arc<dyn Fn(&ToolCall, &ToolResult, bool) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ToolHooks {
    before: Vec<BeforeToolHook>,
    after: Vec<AfterToolHook>,
}

impl ToolHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ToolCall, &ToolContext) + Send + Sync + 'static,
    {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn on_after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ToolCall, &ToolResult, bool) + Send + Sync + 'static,
    {
        self.after.push(Arc::new(hook));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    pub fn run_before(&self, call: &ToolCall, ctx: &ToolContext) {
        for hook in &self.before {
            hook(call, ctx);
        }
    }

    pub fn run_after(&self, call: &ToolCall, result: &ToolResult, successful: bool) {
        for hook in &self.after {
            hook(call, result, successful);
        }
    }
}

impl std::fmt::Debug for ToolHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}
