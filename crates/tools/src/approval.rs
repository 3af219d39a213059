//! Approval Gate
//!
//! Tracks tool calls that need a human decision before they may run.
//!
//! A call to an approval-gated tool is fingerprinted from its invocation id,
//! tool name and arguments. With no recorded decision the loop registers a
//! [`PendingToolCall`], notifies observers and suspends. Once
//! [`ApprovalStore::record_approval`] is called, re-invoking the same call
//! finds the decision: approved calls execute, rejected calls produce a
//! rejection result without running the handler.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// A tool call waiting for an external approval decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    /// Fingerprint of `(invocation_id, tool, arguments)`.
    pub id: String,
    pub tool: String,
    /// Backend-assigned id of the call that triggered the request.
    pub tool_call_id: String,
    pub arguments: Value,
    pub agent_identity: String,
    pub invocation_id: String,
}

impl PendingToolCall {
    pub fn new(
        tool: impl Into<String>,
        tool_call_id: impl Into<String>,
        arguments: Value,
        agent_identity: impl Into<String>,
        invocation_id: impl Into<String>,
    ) -> Self {
        let tool = tool.into();
        let invocation_id = invocation_id.into();
        Self {
            id: Self::fingerprint(&invocation_id, &tool, &arguments),
            tool,
            tool_call_id: tool_call_id.into(),
            arguments,
            agent_identity: agent_identity.into(),
            invocation_id,
        }
    }

    /// Stable id for a call, independent of the backend's call id.
    ///
    /// `serde_json` maps are ordered, so equal argument objects hash equally.
    pub fn fingerprint(invocation_id: &str, tool: &str, arguments: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(invocation_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(tool.as_bytes());
        hasher.update([0u8]);
        hasher.update(arguments.to_string().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// A recorded human decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// Storage for pending calls and decisions.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Decision recorded for a pending id, if any.
    async fn decision(&self, pending_id: &str) -> Option<ApprovalDecision>;

    /// Remember a call awaiting a decision.
    async fn register_pending(&self, pending: PendingToolCall);

    async fn pending(&self, pending_id: &str) -> Option<PendingToolCall>;

    /// Record a decision. The pending entry (if any) is dropped; it is
    /// returned so callers can see what was decided.
    async fn record_approval(
        &self,
        pending_id: &str,
        approved: bool,
        reason: Option<String>,
    ) -> Option<PendingToolCall>;
}

/// Receives approval requests so a UI can prompt a human.
pub trait ApprovalNotifier: Send + Sync {
    fn approval_requested(&self, pending: &PendingToolCall);
}

/// Process-local approval store.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    pending: RwLock<HashMap<String, PendingToolCall>>,
    decisions: RwLock<HashMap<String, ApprovalDecision>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls still awaiting a decision.
    pub async fn pending_calls(&self) -> Vec<PendingToolCall> {
        self.pending.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn decision(&self, pending_id: &str) -> Option<ApprovalDecision> {
        self.decisions.read().await.get(pending_id).cloned()
    }

    async fn register_pending(&self, pending: PendingToolCall) {
        self.pending
            .write()
            .await
            .insert(pending.id.clone(), pending);
    }

    async fn pending(&self, pending_id: &str) -> Option<PendingToolCall> {
        self.pending.read().await.get(pending_id).cloned()
    }

    async fn record_approval(
        &self,
        pending_id: &str,
        approved: bool,
        reason: Option<String>,
    ) -> Option<PendingToolCall> {
        self.decisions
            .write()
            .await
            .insert(pending_id.to_string(), ApprovalDecision { approved, reason });
        let resolved = self.pending.write().await.remove(pending_id);
        if resolved.is_none() {
            tracing::warn!("Approval recorded for unknown pending call {}", pending_id);
        }
        resolved
    }
}
