//! Gateway Trait
//!
//! The contract every backend implements. A gateway owns one provider's
//! configuration and the tool runtime used to execute calls the model makes.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use modelgate_core::{
    EventKind, FinishReason, StreamEvent, ToolCall, ToolContext, ToolResult, Usage,
};
use modelgate_tools::ToolRuntime;

use crate::error::GatewayResult;
use crate::types::{ProviderConfig, TextRequest, TextResponse};

/// Lazily produced canonical events. Dropping it releases the socket or process.
pub type EventStream = Pin<Box<dyn Stream<Item = GatewayResult<StreamEvent>> + Send>>;

#[async_trait]
pub trait Gateway: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    /// Registered provider name.
    fn name(&self) -> &str {
        &self.config().name
    }

    fn tool_runtime(&self) -> &ToolRuntime;

    /// Replace the tool runtime (approvals, deferred queue, hooks).
    fn with_tool_runtime(self, runtime: ToolRuntime) -> Self
    where
        Self: Sized;

    /// Register lifecycle callbacks around every real tool execution.
    fn on_tool_invocation<B, A>(self, before: B, after: A) -> Self
    where
        Self: Sized,
        B: Fn(&ToolCall, &ToolContext) + Send + Sync + 'static,
        A: Fn(&ToolCall, &ToolResult, bool) + Send + Sync + 'static,
    {
        let runtime = self.tool_runtime().clone().on_tool_invocation(before, after);
        self.with_tool_runtime(runtime)
    }

    /// Blocking call: the full response after any tool round trips.
    async fn generate_text(&self, request: TextRequest) -> GatewayResult<TextResponse>;

    /// Streaming call. Connection and spawn failures are returned here;
    /// later failures arrive as the stream's final `Err` item.
    async fn stream_text(&self, request: TextRequest) -> GatewayResult<EventStream>;
}

/// Drain a stream into a vector, stopping at the first error.
pub async fn collect_events(mut stream: EventStream) -> GatewayResult<Vec<StreamEvent>> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event?);
    }
    Ok(events)
}

/// Fold canonical events back into a response.
pub fn response_from_events(events: &[StreamEvent]) -> TextResponse {
    let mut response = TextResponse::default();
    for event in events {
        match &event.kind {
            EventKind::StreamStart { model, provider } => {
                response.model = model.clone();
                response.provider = provider.clone();
            }
            EventKind::TextDelta { delta, .. } => response.text.push_str(delta),
            EventKind::ToolCall { call } => response.tool_calls.push(call.clone()),
            EventKind::ToolResult { result, .. } => response.tool_results.push(result.clone()),
            EventKind::StreamEnd { reason, usage } => {
                response.finish_reason = Some(reason.clone());
                response.usage = *usage;
            }
            _ => {}
        }
    }
    response
}

/// Tracks the open text and reasoning parts of a stream so start/end
/// markers always pair up.
#[derive(Debug, Default)]
pub(crate) struct PartTracker {
    text_id: Option<String>,
    reasoning_id: Option<String>,
}

impl PartTracker {
    pub(crate) fn text(&mut self, delta: String) -> Vec<StreamEvent> {
        let mut out = self.close_reasoning();
        let id = match &self.text_id {
            Some(id) => id.clone(),
            None => {
                let id = format!("msg_{}", uuid::Uuid::new_v4().simple());
                out.push(StreamEvent::new(EventKind::TextStart {
                    message_id: id.clone(),
                }));
                self.text_id = Some(id.clone());
                id
            }
        };
        out.push(StreamEvent::text_delta(id, delta));
        out
    }

    pub(crate) fn reasoning(&mut self, delta: String) -> Vec<StreamEvent> {
        let mut out = self.close_text();
        let id = match &self.reasoning_id {
            Some(id) => id.clone(),
            None => {
                let id = format!("rs_{}", uuid::Uuid::new_v4().simple());
                out.push(StreamEvent::new(EventKind::ReasoningStart {
                    reasoning_id: id.clone(),
                }));
                self.reasoning_id = Some(id.clone());
                id
            }
        };
        out.push(StreamEvent::reasoning_delta(id, delta));
        out
    }

    fn close_text(&mut self) -> Vec<StreamEvent> {
        self.text_id
            .take()
            .map(|message_id| StreamEvent::new(EventKind::TextEnd { message_id }))
            .into_iter()
            .collect()
    }

    fn close_reasoning(&mut self) -> Vec<StreamEvent> {
        self.reasoning_id
            .take()
            .map(|reasoning_id| StreamEvent::new(EventKind::ReasoningEnd { reasoning_id }))
            .into_iter()
            .collect()
    }

    /// Close whatever is open.
    pub(crate) fn close(&mut self) -> Vec<StreamEvent> {
        let mut out = self.close_reasoning();
        out.extend(self.close_text());
        out
    }
}

/// Final event for a stream that ended normally.
pub(crate) fn stream_end(reason: Option<FinishReason>, usage: Usage) -> StreamEvent {
    StreamEvent::stream_end(reason.unwrap_or(FinishReason::Stop), usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_tracker_pairs_markers() {
        let mut parts = PartTracker::default();
        let mut events = Vec::new();
        events.extend(parts.reasoning("plan".into()));
        events.extend(parts.text("a".into()));
        events.extend(parts.text("b".into()));
        events.extend(parts.close());

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match &e.kind {
                EventKind::ReasoningStart { .. } => "reasoning-start",
                EventKind::ReasoningDelta { .. } => "reasoning-delta",
                EventKind::ReasoningEnd { .. } => "reasoning-end",
                EventKind::TextStart { .. } => "text-start",
                EventKind::TextDelta { .. } => "text-delta",
                EventKind::TextEnd { .. } => "text-end",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "reasoning-start",
                "reasoning-delta",
                "reasoning-end",
                "text-start",
                "text-delta",
                "text-delta",
                "text-end"
            ]
        );
        assert!(parts.close().is_empty());
    }

    #[test]
    fn test_response_from_events() {
        let call = ToolCall::new("c1", "echo", serde_json::json!({}));
        let events = vec![
            StreamEvent::stream_start("gpt-4o", "openai"),
            StreamEvent::text_delta("m", "Hello "),
            StreamEvent::text_delta("m", "world"),
            StreamEvent::tool_call(call.clone()),
            StreamEvent::tool_result(ToolResult::for_call(&call, serde_json::json!(1)), true, None),
            StreamEvent::stream_end(FinishReason::Stop, Usage::new(3, 2)),
        ];
        let response = response_from_events(&events);
        assert_eq!(response.text, "Hello world");
        assert_eq!(response.model, "gpt-4o");
        assert_eq!(response.tool_calls, vec![call]);
        assert_eq!(response.tool_results.len(), 1);
        assert_eq!(response.usage, Usage::new(3, 2));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    }
}
