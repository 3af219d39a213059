//! Canonical Stream Event Model
//!
//! Backend-agnostic value objects (`ToolCall`, `ToolResult`, `Usage`) and the
//! tagged `StreamEvent` union that every gateway produces. Downstream consumers
//! never need to know which backend emitted an event.
//!
//! Events can also be re-encoded for browser clients with [`encode_sse`]: each
//! event becomes one `data: {json}` line carrying a kebab-case `type`
//! discriminator, and the sequence is closed by a literal `[DONE]` line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Sentinel payload that terminates an SSE stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A tool invocation requested by the model.
///
/// `id` is assigned by the backend and must round-trip to the matching
/// [`ToolResult::tool_call_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed arguments; always a JSON object.
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reasoning_id: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            result_id: None,
            reasoning_id: None,
        }
    }
}

/// Outcome of executing a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Equals the originating `ToolCall::id`.
    pub tool_call_id: String,
    pub name: String,
    pub arguments: Value,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_id: Option<String>,
}

impl ToolResult {
    /// Build a result for the given call, copying its id, name and arguments.
    pub fn for_call(call: &ToolCall, result: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result,
            result_id: call.result_id.clone(),
        }
    }

    /// Render the result as the text sent back to a model.
    pub fn content_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Token usage for one call.
///
/// Fields start at zero and are only ever increased.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cache_write_tokens: u32,
    pub cache_read_tokens: u32,
    pub reasoning_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            ..Default::default()
        }
    }

    /// Add another step's usage into this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.cache_write_tokens = self.cache_write_tokens.saturating_add(other.cache_write_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
        self.reasoning_tokens = self.reasoning_tokens.saturating_add(other.reasoning_tokens);
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens
            .saturating_add(self.completion_tokens)
            .saturating_add(self.reasoning_tokens)
    }
}

/// Why a response ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of response
    Stop,
    /// Hit the max token limit
    Length,
    /// Model asked for tools
    ToolCalls,
    /// Output was filtered by the backend
    ContentFilter,
    /// Backend reported an error in-band
    Error,
    /// Anything else, kept verbatim
    Other(String),
}

impl From<&str> for FinishReason {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stop" | "end_turn" | "success" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            "error" => FinishReason::Error,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::Error => "error",
            FinishReason::Other(s) => s.as_str(),
        }
    }
}

/// Payload of a canonical stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StreamStart {
        model: String,
        provider: String,
    },
    TextStart {
        message_id: String,
    },
    TextDelta {
        message_id: String,
        delta: String,
    },
    TextEnd {
        message_id: String,
    },
    ReasoningStart {
        reasoning_id: String,
    },
    ReasoningDelta {
        reasoning_id: String,
        delta: String,
    },
    ReasoningEnd {
        reasoning_id: String,
    },
    ToolCall {
        call: ToolCall,
    },
    ToolResult {
        result: ToolResult,
        successful: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
    StreamEnd {
        reason: FinishReason,
        usage: Usage,
    },
    Error {
        error_type: String,
        message: String,
        recoverable: bool,
    },
}

/// One unit of streamed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl StreamEvent {
    /// Wrap a payload with a fresh id and the current time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn stream_start(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::new(EventKind::StreamStart {
            model: model.into(),
            provider: provider.into(),
        })
    }

    pub fn text_delta(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::new(EventKind::TextDelta {
            message_id: message_id.into(),
            delta: delta.into(),
        })
    }

    pub fn reasoning_delta(reasoning_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::new(EventKind::ReasoningDelta {
            reasoning_id: reasoning_id.into(),
            delta: delta.into(),
        })
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self::new(EventKind::ToolCall { call })
    }

    pub fn tool_result(result: ToolResult, successful: bool, error: Option<String>) -> Self {
        Self::new(EventKind::ToolResult {
            result,
            successful,
            error,
        })
    }

    pub fn stream_end(reason: FinishReason, usage: Usage) -> Self {
        Self::new(EventKind::StreamEnd { reason, usage })
    }

    pub fn error(error_type: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self::new(EventKind::Error {
            error_type: error_type.into(),
            message: message.into(),
            recoverable,
        })
    }

    pub fn is_stream_end(&self) -> bool {
        matches!(self.kind, EventKind::StreamEnd { .. })
    }

    /// Encode as the browser-facing wire object.
    pub fn to_wire_json(&self) -> Value {
        match &self.kind {
            EventKind::StreamStart { model, provider } => serde_json::json!({
                "type": "start",
                "messageId": self.id,
                "messageMetadata": { "model": model, "provider": provider },
            }),
            EventKind::TextStart { message_id } => serde_json::json!({
                "type": "text-start",
                "id": message_id,
            }),
            EventKind::TextDelta { message_id, delta } => serde_json::json!({
                "type": "text-delta",
                "id": message_id,
                "delta": delta,
            }),
            EventKind::TextEnd { message_id } => serde_json::json!({
                "type": "text-end",
                "id": message_id,
            }),
            EventKind::ReasoningStart { reasoning_id } => serde_json::json!({
                "type": "reasoning-start",
                "id": reasoning_id,
            }),
            EventKind::ReasoningDelta {
                reasoning_id,
                delta,
            } => serde_json::json!({
                "type": "reasoning-delta",
                "id": reasoning_id,
                "delta": delta,
            }),
            EventKind::ReasoningEnd { reasoning_id } => serde_json::json!({
                "type": "reasoning-end",
                "id": reasoning_id,
            }),
            EventKind::ToolCall { call } => serde_json::json!({
                "type": "tool-input-available",
                "toolCallId": call.id,
                "toolName": call.name,
                "input": call.arguments,
            }),
            EventKind::ToolResult {
                result,
                successful,
                error,
            } => {
                let mut wire = serde_json::json!({
                    "type": "tool-output-available",
                    "toolCallId": result.tool_call_id,
                    "output": result.result,
                });
                if !successful {
                    wire["errorText"] =
                        Value::String(error.clone().unwrap_or_else(|| "tool failed".to_string()));
                }
                wire
            }
            EventKind::StreamEnd { reason, usage } => serde_json::json!({
                "type": "finish",
                "finishReason": reason.as_str(),
                "usage": {
                    "promptTokens": usage.prompt_tokens,
                    "completionTokens": usage.completion_tokens,
                    "cacheWriteTokens": usage.cache_write_tokens,
                    "cacheReadTokens": usage.cache_read_tokens,
                    "reasoningTokens": usage.reasoning_tokens,
                },
            }),
            EventKind::Error { message, .. } => serde_json::json!({
                "type": "error",
                "errorText": message,
            }),
        }
    }
}

/// Encode one event as an SSE `data:` line pair.
pub fn sse_line(event: &StreamEvent) -> String {
    format!("data: {}\n\n", event.to_wire_json())
}

/// Encode a whole event sequence, terminated by the `[DONE]` sentinel.
pub fn encode_sse(events: &[StreamEvent]) -> String {
    let mut out = String::new();
    for event in events {
        out.push_str(&sse_line(event));
    }
    out.push_str(&format!("data: {}\n\n", DONE_SENTINEL));
    out
}
