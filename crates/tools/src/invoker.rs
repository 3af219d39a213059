//! Tool Invocation Loop
//!
//! Decides what happens to each tool call a backend emits:
//!
//! 1. Unknown tool names fail with [`ToolInvokeError::UnknownTool`].
//! 2. Approval-gated tools consult the [`ApprovalStore`]. Without a decision
//!    the call is registered as pending and the invocation suspends. A
//!    rejection produces a result without running the handler.
//! 3. Deferred tools are enqueued and answered with a pending placeholder.
//! 4. Everything else runs inline, wrapped in the before/after hooks.

use std::sync::Arc;

use modelgate_core::{ExecutionMode, ToolCall, ToolContext, ToolRegistry, ToolResult};

use crate::approval::{ApprovalNotifier, ApprovalStore, InMemoryApprovalStore, PendingToolCall};
use crate::deferred::{execute_with_hooks, DeferredJob, DeferredQueue};
use crate::error::{ToolInvokeError, ToolInvokeResult};
use crate::hooks::ToolHooks;

/// What the loop did with a single call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The handler ran and returned a value.
    Executed(ToolResult),
    /// A recorded decision rejected the call; the handler did not run.
    Rejected {
        result: ToolResult,
        reason: Option<String>,
    },
    /// No decision yet. The invocation must stop and surface this call.
    AwaitingApproval(PendingToolCall),
    /// The call was queued. `result` is the pending placeholder.
    Deferred { result: ToolResult, job: DeferredJob },
}

impl ToolOutcome {
    /// Result to report back to the model, if the loop may continue.
    pub fn result(&self) -> Option<&ToolResult> {
        match self {
            ToolOutcome::Executed(result)
            | ToolOutcome::Rejected { result, .. }
            | ToolOutcome::Deferred { result, .. } => Some(result),
            ToolOutcome::AwaitingApproval(_) => None,
        }
    }

    pub fn is_successful(&self) -> bool {
        !matches!(
            self,
            ToolOutcome::Rejected { .. } | ToolOutcome::AwaitingApproval(_)
        )
    }
}

/// Shared services used by every invocation: approvals, queue, hooks.
#[derive(Clone)]
pub struct ToolRuntime {
    approvals: Arc<dyn ApprovalStore>,
    notifier: Option<Arc<dyn ApprovalNotifier>>,
    queue: Option<Arc<dyn DeferredQueue>>,
    hooks: ToolHooks,
}

impl Default for ToolRuntime {
    fn default() -> Self {
        Self {
            approvals: Arc::new(InMemoryApprovalStore::new()),
            notifier: None,
            queue: None,
            hooks: ToolHooks::default(),
        }
    }
}

impl ToolRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approval_store(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.approvals = store;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_deferred_queue(mut self, queue: Arc<dyn DeferredQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_hooks(mut self, hooks: ToolHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Add one before and one after hook.
    pub fn on_tool_invocation<B, A>(mut self, before: B, after: A) -> Self
    where
        B: Fn(&ToolCall, &ToolContext) + Send + Sync + 'static,
        A: Fn(&ToolCall, &ToolResult, bool) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_before(before).on_after(after);
        self
    }

    pub fn approvals(&self) -> &Arc<dyn ApprovalStore> {
        &self.approvals
    }

    pub fn hooks(&self) -> &ToolHooks {
        &self.hooks
    }

    /// Bind the runtime to one invocation's tools and identity.
    pub fn invoker(
        &self,
        registry: ToolRegistry,
        invocation_id: impl Into<String>,
        agent_identity: impl Into<String>,
    ) -> ToolInvoker {
        ToolInvoker {
            runtime: self.clone(),
            registry,
            invocation_id: invocation_id.into(),
            agent_identity: agent_identity.into(),
        }
    }
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime")
            .field("has_notifier", &self.notifier.is_some())
            .field("has_queue", &self.queue.is_some())
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Runs the calls of a single model invocation.
pub struct ToolInvoker {
    runtime: ToolRuntime,
    registry: ToolRegistry,
    invocation_id: String,
    agent_identity: String,
}

impl ToolInvoker {
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub async fn invoke(&self, call: &ToolCall) -> ToolInvokeResult<ToolOutcome> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolInvokeError::UnknownTool(call.name.clone()))?;
        let ctx = ToolContext::new(
            self.invocation_id.clone(),
            self.agent_identity.clone(),
            call.id.clone(),
        );

        if tool.requires_approval() {
            let pending_id =
                PendingToolCall::fingerprint(&self.invocation_id, &call.name, &call.arguments);
            match self.runtime.approvals.decision(&pending_id).await {
                None => {
                    let pending = PendingToolCall::new(
                        call.name.clone(),
                        call.id.clone(),
                        call.arguments.clone(),
                        self.agent_identity.clone(),
                        self.invocation_id.clone(),
                    );
                    self.runtime.approvals.register_pending(pending.clone()).await;
                    if let Some(notifier) = &self.runtime.notifier {
                        notifier.approval_requested(&pending);
                    }
                    tracing::info!(
                        "Tool '{}' awaiting approval (pending id {})",
                        call.name,
                        pending.id
                    );
                    return Ok(ToolOutcome::AwaitingApproval(pending));
                }
                Some(decision) if !decision.approved => {
                    tracing::info!("Tool '{}' rejected by approver", call.name);
                    let result = ToolResult::for_call(
                        call,
                        serde_json::json!({
                            "status": "rejected",
                            "reason": decision.reason,
                        }),
                    );
                    return Ok(ToolOutcome::Rejected {
                        result,
                        reason: decision.reason,
                    });
                }
                Some(_) => {
                    tracing::debug!("Tool '{}' approved", call.name);
                }
            }
        }

        if tool.execution_mode() == ExecutionMode::Deferred {
            let queue = self.runtime.queue.as_ref().ok_or_else(|| {
                ToolInvokeError::queue(format!(
                    "tool '{}' is deferred but no queue is configured",
                    call.name
                ))
            })?;
            let job = DeferredJob::for_call(tool.as_ref(), call, &ctx);
            let result = job.placeholder(call);
            queue.enqueue(job.clone()).await?;
            tracing::info!("Deferred tool '{}' as {}", call.name, job.call_id);
            return Ok(ToolOutcome::Deferred { result, job });
        }

        let result = execute_with_hooks(tool.as_ref(), call, &ctx, &self.runtime.hooks).await?;
        Ok(ToolOutcome::Executed(result))
    }
}
