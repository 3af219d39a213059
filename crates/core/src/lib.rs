//! Modelgate Core
//!
//! Foundational types shared by every Modelgate crate. This crate has no
//! knowledge of HTTP, subprocesses or any particular model backend.
//!
//! ## Module Organization
//!
//! - `error` - Errors returned by tool handlers (`CoreError`, `CoreResult`)
//! - `context` - Tool execution context (`ToolContext`)
//! - `tool_trait` - Tool abstraction (`ToolDefinitionTrait`, `ToolExecutable`, `Tool`, `ToolRegistry`)
//! - `streaming` - Canonical stream events and value objects (`StreamEvent`, `ToolCall`, `ToolResult`, `Usage`)

pub mod context;
pub mod error;
pub mod streaming;
pub mod tool_trait;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Tool Context ───────────────────────────────────────────────────────
pub use context::ToolContext;

// ── Tool Traits ────────────────────────────────────────────────────────
pub use tool_trait::{
    ExecutionMode, FunctionTool, Tool, ToolDefinitionTrait, ToolExecutable, ToolRegistry,
};

// ── Canonical Events ───────────────────────────────────────────────────
pub use streaming::{
    encode_sse, sse_line, EventKind, FinishReason, StreamEvent, ToolCall, ToolResult, Usage,
    DONE_SENTINEL,
};
