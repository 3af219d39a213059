//! Modelgate
//!
//! One interface over many model backends: hosted OpenAI-compatible HTTP
//! APIs and the Claude Code CLI. Every backend's output is normalized into
//! canonical stream events, tool calls run through a shared invocation loop
//! with approval and deferred execution, and calls fail over across an
//! ordered list of providers.
//!
//! ## Module Organization
//!
//! - `config` - JSON/TOML configuration (`GatewayConfig`)
//! - `registry` - provider name → gateway, default model and breaker
//! - `circuit` - per-provider circuit breaker
//! - `failover` - ordered failover with retry-after handling
//!
//! The member crates are re-exported as `core`, `llm` and `tools`.

pub mod circuit;
pub mod config;
pub mod failover;
pub mod registry;

pub use modelgate_core as core;
pub use modelgate_llm as llm;
pub use modelgate_tools as tools;

pub use circuit::{CircuitBreaker, CircuitState};
pub use config::{
    CandidateEntry, CircuitBreakerEntry, CliEntry, FailoverEntry, GatewayConfig, ProviderEntry,
};
pub use failover::{
    Candidate, FailedOver, FailoverAttempt, FailoverChain, FailoverConfig, FailoverLog,
    FailoverObserver, RetryAfterPolicy,
};
pub use registry::{build_gateway, Provider, ProviderRegistry};

pub use modelgate_core::{EventKind, FinishReason, StreamEvent, ToolCall, ToolResult, Usage};
pub use modelgate_llm::{
    EventStream, Gateway, GatewayError, GatewayResult, Message, ProviderConfig, ProviderKind,
    TextRequest, TextResponse,
};
