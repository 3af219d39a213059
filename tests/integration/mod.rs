//! Integration Tests Module
//!
//! End-to-end tests through the public `modelgate` API: mock HTTP backends,
//! a scripted stand-in for the Claude Code CLI, failover across providers
//! and the approval / deferred tool paths.

// Shared helpers
mod common;

// Failover across registered providers
mod failover_test;

// HTTP streaming, tool execution and wire encoding
mod http_stream_test;

// CLI session continuity
mod cli_session_test;

// Approval gate and deferred tools
mod approval_test;
