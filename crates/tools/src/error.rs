//! Tool Invocation Errors

use modelgate_core::CoreError;
use thiserror::Error;

/// Failures raised by the tool invocation loop.
///
/// Approval and deferral are not errors; they are `ToolOutcome` variants.
#[derive(Error, Debug)]
pub enum ToolInvokeError {
    /// The model asked for a tool that is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The tool handler itself failed.
    #[error("Tool '{tool}' failed: {source}")]
    Execution {
        tool: String,
        #[source]
        source: CoreError,
    },

    /// A deferred tool was called but no queue is configured, or the queue refused the job.
    #[error("Deferred queue error: {0}")]
    Queue(String),
}

pub type ToolInvokeResult<T> = Result<T, ToolInvokeError>;

impl ToolInvokeError {
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Name of the tool involved, when known.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            ToolInvokeError::UnknownTool(name) => Some(name),
            ToolInvokeError::Execution { tool, .. } => Some(tool),
            ToolInvokeError::Queue(_) => None,
        }
    }
}
