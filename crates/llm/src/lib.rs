//! Modelgate LLM
//!
//! Gateways that turn one backend's wire protocol into canonical calls and
//! events:
//! - OpenAI-compatible HTTP APIs (OpenAI, DeepSeek, Ollama, generic)
//! - The Claude Code CLI, driven as a subprocess
//!
//! Also includes the SSE and line-delimited JSON parsers, the tool-call
//! fragment accumulator, the error taxonomy and the HTTP client factory.

pub mod claude_code;
pub mod error;
pub mod fragments;
pub mod gateway;
pub mod http_client;
pub mod jsonl;
pub mod openai;
pub mod sse;
pub mod types;

// Re-export main types
pub use claude_code::{conversation_key, ClaudeCodeGateway, SessionMap};
pub use error::{parse_http_error, GatewayError, GatewayResult};
pub use fragments::ToolCallAccumulator;
pub use gateway::{collect_events, response_from_events, EventStream, Gateway};
pub use http_client::build_http_client;
pub use jsonl::{parse_line, CliRecord};
pub use openai::{supports_tools, OpenAIGateway};
pub use sse::{parse_sse, ChunkEvent};
pub use types::*;
