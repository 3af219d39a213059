//! Modelgate Tools
//!
//! The tool invocation loop shared by every gateway:
//! - `ToolRuntime` / `ToolInvoker` - run, gate, or defer each tool call
//! - `ApprovalStore` - pending calls and recorded human decisions
//! - `DeferredQueue` / `DeferredRunner` - out-of-process execution and resume
//! - `ToolHooks` - before/after observers around real executions

pub mod approval;
pub mod deferred;
pub mod error;
pub mod hooks;
pub mod invoker;

pub use approval::{
    ApprovalDecision, ApprovalNotifier, ApprovalStore, InMemoryApprovalStore, PendingToolCall,
};
pub use deferred::{DeferredJob, DeferredQueue, DeferredRunner, InMemoryDeferredQueue};
pub use error::{ToolInvokeError, ToolInvokeResult};
pub use hooks::{AfterToolHook, BeforeToolHook, ToolHooks};
pub use invoker::{ToolInvoker, ToolOutcome, ToolRuntime};
