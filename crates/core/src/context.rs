//! Tool Execution Context
//!
//! The read-only context a tool handler receives. It identifies which model
//! invocation asked for the call and on whose behalf, so handlers and hooks
//! can correlate their work without knowing which backend produced the call.

use serde::{Deserialize, Serialize};

/// Context for a single tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    /// Identifier of the model invocation that produced the call.
    invocation_id: String,
    /// Identity of the agent (or caller) driving the invocation.
    agent_identity: String,
    /// Identifier of the tool call being executed.
    tool_call_id: String,
}

impl ToolContext {
    pub fn new(
        invocation_id: impl Into<String>,
        agent_identity: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            agent_identity: agent_identity.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn agent_identity(&self) -> &str {
        &self.agent_identity
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    /// Same invocation and agent, different call.
    pub fn for_call(&self, tool_call_id: impl Into<String>) -> Self {
        Self {
            invocation_id: self.invocation_id.clone(),
            agent_identity: self.agent_identity.clone(),
            tool_call_id: tool_call_id.into(),
        }
    }
}
