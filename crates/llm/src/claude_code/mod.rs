//! Claude Code CLI Gateway
//!
//! Drives the `claude` CLI as a subprocess:
//! - `process` - spawn configuration, process handle, timed line reader
//! - `session` - conversation key → CLI session id map
//! - `gateway` - the `Gateway` implementation

pub mod gateway;
pub mod process;
pub mod session;

pub use gateway::ClaudeCodeGateway;
pub use process::{CliProcess, SpawnConfig};
pub use session::{conversation_key, SessionMap};
