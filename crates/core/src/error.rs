//! Tool Handler Errors
//!
//! `CoreError` is what a tool handler returns. The `From` conversions let
//! handlers use `?` on argument decoding and file access. Gateway-level
//! failures (transport, rate limiting, process exits) are `GatewayError` in
//! the LLM crate, which wraps a handler's `CoreError` as a tool execution
//! failure.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Arguments did not match what the handler expects.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Argument decoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A registry lookup missed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The handler ran and failed.
    #[error("Tool error: {0}")]
    Tool(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }
}
