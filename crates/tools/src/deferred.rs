//! Deferred Tool Execution
//!
//! Tools whose execution mode is [`ExecutionMode::Deferred`] are not run in
//! the invocation loop. The loop enqueues a [`DeferredJob`] and returns a
//! pending placeholder. A worker later calls [`DeferredRunner::resume`] with
//! the job's class, arguments and call id.
//!
//! [`ExecutionMode::Deferred`]: modelgate_core::ExecutionMode::Deferred

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use modelgate_core::{Tool, ToolCall, ToolContext, ToolRegistry, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use crate::error::{ToolInvokeError, ToolInvokeResult};
use crate::hooks::ToolHooks;

/// Serializable description of a deferred call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredJob {
    /// Generated id the worker passes back to `resume`.
    pub call_id: String,
    pub tool_class: String,
    pub arguments: Value,
    /// Backend-assigned id of the originating tool call.
    pub tool_call_id: String,
    pub invocation_id: String,
    pub agent_identity: String,
}

impl DeferredJob {
    pub fn for_call(tool: &dyn Tool, call: &ToolCall, ctx: &ToolContext) -> Self {
        Self {
            call_id: format!("deferred_{}", uuid::Uuid::new_v4()),
            tool_class: tool.class_name().to_string(),
            arguments: call.arguments.clone(),
            tool_call_id: call.id.clone(),
            invocation_id: ctx.invocation_id().to_string(),
            agent_identity: ctx.agent_identity().to_string(),
        }
    }

    /// Placeholder result handed back to the model while the job is queued.
    pub fn placeholder(&self, call: &ToolCall) -> ToolResult {
        ToolResult::for_call(
            call,
            serde_json::json!({ "status": "pending", "call_id": self.call_id }),
        )
    }
}

/// Destination for deferred jobs.
#[async_trait]
pub trait DeferredQueue: Send + Sync {
    async fn enqueue(&self, job: DeferredJob) -> ToolInvokeResult<()>;
}

/// FIFO queue kept in memory, mostly for tests and single-process workers.
#[derive(Default)]
pub struct InMemoryDeferredQueue {
    jobs: Mutex<VecDeque<DeferredJob>>,
}

impl InMemoryDeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pop(&self) -> Option<DeferredJob> {
        self.jobs.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl DeferredQueue for InMemoryDeferredQueue {
    async fn enqueue(&self, job: DeferredJob) -> ToolInvokeResult<()> {
        tracing::debug!("Enqueued deferred job {} ({})", job.call_id, job.tool_class);
        self.jobs.lock().await.push_back(job);
        Ok(())
    }
}

/// Worker-side executor for deferred jobs.
///
/// Results are kept per call id. Resuming an id that already completed, or
/// that another task is running right now, returns that run's result
/// without invoking the handler again. A failed run leaves the id free for
/// the next delivery.
pub struct DeferredRunner {
    registry: ToolRegistry,
    hooks: ToolHooks,
    agent_identity: String,
    completed: Mutex<HashMap<String, Arc<OnceCell<ToolResult>>>>,
}

impl DeferredRunner {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            hooks: ToolHooks::default(),
            agent_identity: "deferred-worker".to_string(),
            completed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_hooks(mut self, hooks: ToolHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_agent_identity(mut self, agent_identity: impl Into<String>) -> Self {
        self.agent_identity = agent_identity.into();
        self
    }

    /// Run the tool registered under `tool_class` for a queued call.
    pub async fn resume(
        &self,
        tool_class: &str,
        arguments: Value,
        call_id: &str,
    ) -> ToolInvokeResult<ToolResult> {
        let tool = self.tool_for_class(tool_class)?;
        self.resume_with(tool, arguments, call_id).await
    }

    /// Run a specific tool instance for a queued call.
    pub async fn resume_with(
        &self,
        tool: Arc<dyn Tool>,
        arguments: Value,
        call_id: &str,
    ) -> ToolInvokeResult<ToolResult> {
        let call = ToolCall::new(call_id, tool.name(), arguments);
        let ctx = ToolContext::new(call_id, self.agent_identity.clone(), call_id);
        self.run_once(tool, call_id, call, ctx).await
    }

    /// Resume a job taken from a [`DeferredQueue`]. The result answers the
    /// originating tool call, so its `tool_call_id` matches the placeholder's.
    pub async fn resume_job(&self, job: &DeferredJob) -> ToolInvokeResult<ToolResult> {
        let tool = self.tool_for_class(&job.tool_class)?;
        let call = ToolCall::new(job.tool_call_id.clone(), tool.name(), job.arguments.clone());
        let ctx = ToolContext::new(
            job.invocation_id.clone(),
            self.agent_identity.clone(),
            job.tool_call_id.clone(),
        );
        self.run_once(tool, &job.call_id, call, ctx).await
    }

    fn tool_for_class(&self, tool_class: &str) -> ToolInvokeResult<Arc<dyn Tool>> {
        self.registry
            .get_by_class(tool_class)
            .ok_or_else(|| ToolInvokeError::UnknownTool(tool_class.to_string()))
    }

    async fn run_once(
        &self,
        tool: Arc<dyn Tool>,
        key: &str,
        call: ToolCall,
        ctx: ToolContext,
    ) -> ToolInvokeResult<ToolResult> {
        let cell = self
            .completed
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone();
        if cell.initialized() {
            tracing::debug!("Deferred call {} already completed", key);
        }
        cell.get_or_try_init(|| execute_with_hooks(tool.as_ref(), &call, &ctx, &self.hooks))
            .await
            .cloned()
    }
}

/// Run a handler with hooks on both sides, mapping failure to an
/// execution error after the after-hooks have seen it.
pub(crate) async fn execute_with_hooks(
    tool: &dyn Tool,
    call: &ToolCall,
    ctx: &ToolContext,
    hooks: &ToolHooks,
) -> ToolInvokeResult<ToolResult> {
    hooks.run_before(call, ctx);
    match tool.execute(ctx, call.arguments.clone()).await {
        Ok(value) => {
            let result = ToolResult::for_call(call, value);
            hooks.run_after(call, &result, true);
            Ok(result)
        }
        Err(e) => {
            let failed = ToolResult::for_call(call, Value::String(e.to_string()));
            hooks.run_after(call, &failed, false);
            Err(ToolInvokeError::Execution {
                tool: call.name.clone(),
                source: e,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_core::FunctionTool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry(runs: Arc<AtomicUsize>) -> ToolRegistry {
        let tool = FunctionTool::new(
            "send_email",
            "Send an email",
            serde_json::json!({"type": "object"}),
            move |_ctx, args| {
                let runs = runs.clone();
                async move {
                    let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(serde_json::json!({ "sent_to": args["to"], "run": n }))
                }
            },
        )
        .deferred()
        .with_class_name("mail.SendEmail");
        ToolRegistry::from_tools([Arc::new(tool) as Arc<dyn Tool>])
    }

    #[tokio::test]
    async fn test_resume_runs_tool_by_class() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = DeferredRunner::new(counting_registry(runs.clone()));

        let result = runner
            .resume("mail.SendEmail", serde_json::json!({"to": "a@b.c"}), "job-1")
            .await
            .unwrap();
        assert_eq!(result.tool_call_id, "job-1");
        assert_eq!(result.name, "send_email");
        assert_eq!(result.result["sent_to"], "a@b.c");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_is_idempotent_per_call_id() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = DeferredRunner::new(counting_registry(runs.clone()));
        let args = serde_json::json!({"to": "a@b.c"});

        let first = runner.resume("mail.SendEmail", args.clone(), "job-1").await.unwrap();
        let second = runner.resume("mail.SendEmail", args.clone(), "job-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        runner.resume("mail.SendEmail", args, "job-2").await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resumes_run_handler_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let tool = FunctionTool::new("slow", "", serde_json::json!({}), move |_ctx, _args| {
            let runs = counter.clone();
            async move {
                // Let the other delivery reach the runner mid-flight.
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                }
                let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(serde_json::json!({ "run": n }))
            }
        })
        .deferred()
        .with_class_name("pkg.Slow");
        let runner = DeferredRunner::new(ToolRegistry::from_tools([Arc::new(tool) as Arc<dyn Tool>]));

        let (a, b) = tokio::join!(
            runner.resume("pkg.Slow", Value::Null, "job-1"),
            runner.resume("pkg.Slow", Value::Null, "job-1"),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_resume_can_be_retried() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let tool = FunctionTool::new("flaky", "", serde_json::json!({}), move |_ctx, _args| {
            let runs = counter.clone();
            async move {
                if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(modelgate_core::CoreError::tool("smtp down"))
                } else {
                    Ok(serde_json::json!("sent"))
                }
            }
        })
        .with_class_name("pkg.Flaky");
        let runner = DeferredRunner::new(ToolRegistry::from_tools([Arc::new(tool) as Arc<dyn Tool>]));

        assert!(runner.resume("pkg.Flaky", Value::Null, "job-1").await.is_err());
        let result = runner.resume("pkg.Flaky", Value::Null, "job-1").await.unwrap();
        assert_eq!(result.result, serde_json::json!("sent"));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resume_job_answers_originating_call() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(runs.clone());
        let tool = registry.get("send_email").unwrap();
        let call = ToolCall::new("call_backend_1", "send_email", serde_json::json!({"to": "x@y.z"}));
        let ctx = ToolContext::new("inv-1", "agent", "call_backend_1");
        let job = DeferredJob::for_call(tool.as_ref(), &call, &ctx);

        let runner = DeferredRunner::new(registry);
        let result = runner.resume_job(&job).await.unwrap();
        assert_eq!(result.tool_call_id, call.id);
        assert_eq!(result.tool_call_id, job.placeholder(&call).tool_call_id);
        assert_eq!(result.result["sent_to"], "x@y.z");

        // The queue's call id stays the dedup key.
        runner.resume_job(&job).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_unknown_class() {
        let runner = DeferredRunner::new(ToolRegistry::new());
        let err = runner
            .resume("missing.Tool", serde_json::json!({}), "job-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolInvokeError::UnknownTool(name) if name == "missing.Tool"));
    }

    #[tokio::test]
    async fn test_job_round_trips_through_queue() {
        let queue = InMemoryDeferredQueue::new();
        let tool = FunctionTool::new("t", "", serde_json::json!({}), |_, _| async {
            Ok(Value::Null)
        })
        .with_class_name("pkg.T");
        let call = ToolCall::new("call_9", "t", serde_json::json!({"x": 1}));
        let ctx = ToolContext::new("inv", "agent", "call_9");
        let job = DeferredJob::for_call(&tool, &call, &ctx);

        let placeholder = job.placeholder(&call);
        assert_eq!(placeholder.tool_call_id, "call_9");
        assert_eq!(placeholder.result["status"], "pending");
        assert_eq!(placeholder.result["call_id"], job.call_id.as_str());

        queue.enqueue(job.clone()).await.unwrap();
        assert_eq!(queue.len().await, 1);
        let popped = queue.pop().await.unwrap();
        assert_eq!(popped, job);
        assert_eq!(popped.tool_class, "pkg.T");
        assert!(queue.is_empty().await);
    }
}
