//! SSE Chunk Parser
//!
//! Turns raw bytes from an OpenAI-style `text/event-stream` body into chunk
//! events. The parser keeps no state: callers hand in their buffer and get
//! back the events from every complete line plus the bytes that still await
//! a newline.

use modelgate_core::{Usage, DONE_SENTINEL};
use serde::Deserialize;

/// One classified piece of a streamed chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    TextDelta(String),
    ReasoningDelta(String),
    /// A fragment of one tool call. Fragments sharing `index` belong to the
    /// same call and their `arguments` are concatenated in arrival order.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Backend finish reason, verbatim.
    Finish(String),
    /// Token counts from a terminal chunk.
    Usage(Usage),
    /// The `[DONE]` sentinel. Nothing after it is parsed.
    Done,
}

/// Parse every complete `\n`-terminated line in `buffer`.
///
/// Returns the events and the unconsumed tail, which the caller prepends to
/// the next read. Malformed JSON payloads are skipped.
pub fn parse_sse(buffer: &[u8]) -> (Vec<ChunkEvent>, Vec<u8>) {
    let mut events = Vec::new();
    let mut consumed = 0;

    while let Some(pos) = buffer[consumed..].iter().position(|b| *b == b'\n') {
        let line = &buffer[consumed..consumed + pos];
        consumed += pos + 1;

        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            continue;
        }
        if payload == DONE_SENTINEL {
            events.push(ChunkEvent::Done);
            break;
        }
        match serde_json::from_str::<ChunkPayload>(payload) {
            Ok(chunk) => classify(chunk, &mut events),
            Err(e) => {
                tracing::debug!("Skipping malformed SSE payload: {}", e);
            }
        }
    }

    (events, buffer[consumed..].to_vec())
}

fn classify(chunk: ChunkPayload, events: &mut Vec<ChunkEvent>) {
    let mut terminal = chunk.choices.is_empty();

    for choice in chunk.choices {
        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                events.push(ChunkEvent::TextDelta(text));
            }
            if let Some(reasoning) = delta
                .reasoning_content
                .or(delta.reasoning)
                .filter(|t| !t.is_empty())
            {
                events.push(ChunkEvent::ReasoningDelta(reasoning));
            }
            for (position, tc) in delta.tool_calls.into_iter().enumerate() {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                events.push(ChunkEvent::ToolCallDelta {
                    index: tc.index.unwrap_or(position),
                    id: tc.id,
                    name,
                    arguments,
                });
            }
        }
        if let Some(reason) = choice.finish_reason {
            terminal = true;
            events.push(ChunkEvent::Finish(reason));
        }
    }

    if terminal {
        if let Some(usage) = chunk.usage {
            events.push(ChunkEvent::Usage(usage.into()));
        }
    }
}

// ============================================================================
// Wire structs
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Usage block shared by streamed and blocking responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    prompt_cache_hit_tokens: Option<u32>,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: u32,
}

impl From<ChunkUsage> for Usage {
    fn from(u: ChunkUsage) -> Self {
        let cached = u
            .prompt_tokens_details
            .map(|d| d.cached_tokens)
            .or(u.prompt_cache_hit_tokens)
            .unwrap_or(0);
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            cache_write_tokens: 0,
            cache_read_tokens: cached,
            reasoning_tokens: u
                .completion_tokens_details
                .map(|d| d.reasoning_tokens)
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        ": keep-alive\n",
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo ✓\"}}]}\r\n\r\n",
        "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"think\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"weather\",\"arguments\":\"{\\\"city\\\"\"}}]}}]}\n\n",
        "data: {not json}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\":\\\"Tokyo\\\"}\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5}}\n\n",
        "data: [DONE]\n\n",
    );

    fn feed_in_parts(parts: &[&[u8]]) -> Vec<ChunkEvent> {
        let mut events = Vec::new();
        let mut pending = Vec::new();
        for part in parts {
            pending.extend_from_slice(part);
            let (mut parsed, rest) = parse_sse(&pending);
            let done = parsed.contains(&ChunkEvent::Done);
            events.append(&mut parsed);
            pending = rest;
            if done {
                break;
            }
        }
        events
    }

    #[test]
    fn test_parse_full_stream() {
        let events = feed_in_parts(&[STREAM.as_bytes()]);
        assert_eq!(
            events,
            vec![
                ChunkEvent::TextDelta("Hel".into()),
                ChunkEvent::TextDelta("lo ✓".into()),
                ChunkEvent::ReasoningDelta("think".into()),
                ChunkEvent::ToolCallDelta {
                    index: 0,
                    id: Some("call_1".into()),
                    name: Some("weather".into()),
                    arguments: "{\"city\"".into(),
                },
                ChunkEvent::ToolCallDelta {
                    index: 0,
                    id: None,
                    name: None,
                    arguments: ":\"Tokyo\"}".into(),
                },
                ChunkEvent::Finish("tool_calls".into()),
                ChunkEvent::Usage(Usage::new(10, 5)),
                ChunkEvent::Done,
            ]
        );
    }

    #[test]
    fn test_split_at_every_offset_yields_same_events() {
        let bytes = STREAM.as_bytes();
        let whole = feed_in_parts(&[bytes]);
        for offset in 0..=bytes.len() {
            let (a, b) = bytes.split_at(offset);
            assert_eq!(feed_in_parts(&[a, b]), whole, "split at byte {}", offset);
        }
    }

    #[test]
    fn test_partial_line_is_returned() {
        let (events, rest) = parse_sse(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: {\"cho");
        assert_eq!(events, vec![ChunkEvent::TextDelta("a".into())]);
        assert_eq!(rest, b"data: {\"cho".to_vec());
    }

    #[test]
    fn test_done_stops_parsing() {
        let (events, rest) = parse_sse(
            b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        );
        assert_eq!(events, vec![ChunkEvent::Done]);
        assert!(!rest.is_empty());
    }

    #[test]
    fn test_usage_only_on_terminal_chunks() {
        // Usage next to a non-terminal delta is ignored.
        let (events, _) = parse_sse(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1}}\n",
        );
        assert_eq!(events, vec![ChunkEvent::TextDelta("x".into())]);

        // The include_usage trailer has no choices at all.
        let (events, _) = parse_sse(
            b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":3,\"prompt_tokens_details\":{\"cached_tokens\":2},\"completion_tokens_details\":{\"reasoning_tokens\":1}}}\n",
        );
        let mut expected = Usage::new(7, 3);
        expected.cache_read_tokens = 2;
        expected.reasoning_tokens = 1;
        assert_eq!(events, vec![ChunkEvent::Usage(expected)]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (events, rest) = parse_sse(b"data: {\ndata: 42\nevent: ping\ndata:\n");
        assert!(events.is_empty());
        assert!(rest.is_empty());
    }
}
