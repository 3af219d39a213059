//! Tool-Call Fragment Accumulator
//!
//! Streaming backends split one tool call across many deltas. Fragments are
//! grouped by index and only parsed once the stream reports a terminal event.

use std::collections::BTreeMap;

use modelgate_core::ToolCall;
use serde_json::Value;

#[derive(Debug, Default, Clone, PartialEq)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Per-stream buffer of partial tool calls, keyed by backend index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. The first non-empty id wins; name and argument
    /// pieces are appended.
    pub fn push(&mut self, index: usize, id: Option<&str>, name: Option<&str>, arguments: &str) {
        let entry = self.calls.entry(index).or_default();
        if entry.id.is_none() {
            entry.id = id.filter(|s| !s.is_empty()).map(|s| s.to_string());
        }
        if let Some(name) = name {
            entry.name.push_str(name);
        }
        entry.arguments.push_str(arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Parse every buffered call in index order and clear the buffer.
    ///
    /// Empty or invalid argument buffers become `{}`; missing ids are generated.
    pub fn drain(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|partial| {
                let arguments = if partial.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    match serde_json::from_str::<Value>(&partial.arguments) {
                        Ok(v) if v.is_object() => v,
                        Ok(other) => {
                            tracing::warn!(
                                "Tool '{}' arguments are not an object: {}",
                                partial.name,
                                other
                            );
                            Value::Object(Default::default())
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Invalid JSON arguments for tool '{}': {}",
                                partial.name,
                                e
                            );
                            Value::Object(Default::default())
                        }
                    }
                };
                let id = partial
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                ToolCall::new(id, partial.name, arguments)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_concatenate_by_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("call_1"), Some("weather"), "{\"city\"");
        acc.push(0, None, None, ":\"Tokyo\"}");
        let calls = acc.drain();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "weather");
        assert_eq!(calls[0].arguments, serde_json::json!({"city": "Tokyo"}));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_interleaved_indices_keep_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(1, Some("b"), Some("second"), "{\"n\":");
        acc.push(0, Some("a"), Some("first"), "{}");
        acc.push(1, Some(""), None, "2}");
        assert_eq!(acc.len(), 2);
        let calls = acc.drain();
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].id, "b");
        assert_eq!(calls[1].arguments, serde_json::json!({"n": 2}));
    }

    #[test]
    fn test_invalid_or_missing_arguments() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, None, Some("noargs"), "");
        acc.push(1, Some("x"), Some("broken"), "{\"a\":");
        let calls = acc.drain();
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].arguments, serde_json::json!({}));
        assert_eq!(calls[1].arguments, serde_json::json!({}));
    }
}
