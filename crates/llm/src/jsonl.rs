//! Line-Delimited JSON Parser
//!
//! Parses the `stream-json` records a Claude Code CLI process writes to
//! stdout, one JSON object per line:
//!
//! ```text
//! system → stream_event* → assistant → user(tool_result)* → ... → result
//! ```
//!
//! With `--include-partial-messages` text arrives in `stream_event` wrappers;
//! the `assistant` record then repeats the full message.

use modelgate_core::{ToolCall, Usage};
use serde::Deserialize;
use serde_json::Value;

/// One structured-output record, reduced to what the gateway needs.
#[derive(Debug, Clone, PartialEq)]
pub enum CliRecord {
    /// `system` init record.
    SessionStarted {
        session_id: Option<String>,
        model: Option<String>,
    },
    TextDelta(String),
    ReasoningDelta(String),
    /// A `tool_use` content block opened.
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },
    /// A fragment of a tool_use block's input JSON.
    ToolInputDelta { index: usize, partial_json: String },
    BlockStop { index: usize },
    MessageStop,
    /// A complete assistant message.
    Assistant {
        text: String,
        tool_calls: Vec<ToolCall>,
        session_id: Option<String>,
    },
    /// Output of a tool the CLI ran itself.
    ToolResult {
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
    /// Final record of the run.
    Result {
        session_id: Option<String>,
        text: Option<String>,
        is_error: bool,
        stop_reason: Option<String>,
        usage: Option<Usage>,
        structured_output: Option<Value>,
    },
    Error(String),
}

/// Parse one line. Blank, malformed and unrecognized lines yield `None`.
pub fn parse_line(line: &str) -> Option<CliRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let event: CliEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!("Skipping unparseable CLI line: {}", e);
            return None;
        }
    };

    match event {
        CliEvent::System { session_id, model } => {
            Some(CliRecord::SessionStarted { session_id, model })
        }
        CliEvent::StreamEvent { event } => match event? {
            InnerEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                StartBlock::ToolUse { id, name } => Some(CliRecord::ToolUseStart { index, id, name }),
                StartBlock::Other => None,
            },
            InnerEvent::ContentBlockDelta { index, delta } => match delta {
                InnerDelta::TextDelta { text } => Some(CliRecord::TextDelta(text)),
                InnerDelta::ThinkingDelta { thinking } => Some(CliRecord::ReasoningDelta(thinking)),
                InnerDelta::InputJsonDelta { partial_json } => Some(CliRecord::ToolInputDelta {
                    index,
                    partial_json,
                }),
                InnerDelta::Other => None,
            },
            InnerEvent::ContentBlockStop { index } => Some(CliRecord::BlockStop { index }),
            InnerEvent::MessageStop => Some(CliRecord::MessageStop),
            InnerEvent::Other => None,
        },
        CliEvent::Assistant {
            message,
            session_id,
        } => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            if let Some(message) = message {
                for block in message.content {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(&t),
                        ContentBlock::ToolUse { id, name, input } => tool_calls.push(
                            ToolCall::new(id, name, input.unwrap_or_else(|| serde_json::json!({}))),
                        ),
                        _ => {}
                    }
                }
            }
            Some(CliRecord::Assistant {
                text,
                tool_calls,
                session_id,
            })
        }
        CliEvent::User { message } => message?.content.into_iter().find_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(CliRecord::ToolResult {
                tool_use_id,
                content: content.unwrap_or(Value::Null),
                is_error: is_error.unwrap_or(false),
            }),
            _ => None,
        }),
        CliEvent::Result {
            result,
            is_error,
            stop_reason,
            usage,
            session_id,
            structured_output,
        } => Some(CliRecord::Result {
            session_id,
            text: result,
            is_error: is_error.unwrap_or(false),
            stop_reason,
            usage: usage.map(Usage::from),
            structured_output,
        }),
        CliEvent::Error { message } => Some(CliRecord::Error(message)),
        CliEvent::Unknown => None,
    }
}

// ============================================================================
// Wire structs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CliEvent {
    System {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    StreamEvent {
        #[serde(default)]
        event: Option<InnerEvent>,
    },
    Assistant {
        #[serde(default)]
        message: Option<CliMessage>,
        #[serde(default)]
        session_id: Option<String>,
    },
    User {
        #[serde(default)]
        message: Option<CliMessage>,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: Option<bool>,
        #[serde(default)]
        stop_reason: Option<String>,
        #[serde(default)]
        usage: Option<CliUsage>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        structured_output: Option<Value>,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InnerEvent {
    ContentBlockStart {
        #[serde(default)]
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: usize,
        delta: InnerDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: usize,
    },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InnerDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        #[serde(default)]
        thinking: String,
    },
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct CliMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Option<Value>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: Option<u32>,
    #[serde(default)]
    cache_read_input_tokens: Option<u32>,
}

impl From<CliUsage> for Usage {
    fn from(u: CliUsage) -> Self {
        Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            cache_write_tokens: u.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: u.cache_read_input_tokens.unwrap_or(0),
            reasoning_tokens: 0,
        }
    }
}
