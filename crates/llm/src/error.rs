//! Gateway Error Taxonomy
//!
//! Every failure a gateway can surface, classified once so the failover
//! wrapper never has to inspect provider-specific details.

use modelgate_tools::{PendingToolCall, ToolInvokeError};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Connection, TLS, read or transport-level timeout failure.
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Rate limited by {provider}: {message}")]
    RateLimited {
        provider: String,
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Provider {provider} overloaded: {message}")]
    ProviderOverloaded { provider: String, message: String },

    /// Raised without making a request.
    #[error("Circuit breaker open for {provider}")]
    CircuitBreakerOpen { provider: String },

    /// CLI process exited non-zero or timed out.
    #[error("Process failed ({}): {stderr}", exit_label(.exit_code))]
    ProcessFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Caller-side request shape error.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Not a failure: the invocation is suspended until a decision is recorded.
    #[error("Tool '{}' requires approval (pending id {})", .0.tool, .0.id)]
    ToolApprovalRequired(PendingToolCall),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Any other non-success HTTP status.
    #[error("{provider} returned HTTP {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "timeout".to_string(),
    }
}

impl GatewayError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether the failover wrapper may move on to the next candidate.
    pub fn is_failoverable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport { .. }
                | GatewayError::RateLimited { .. }
                | GatewayError::ProviderOverloaded { .. }
                | GatewayError::CircuitBreakerOpen { .. }
                | GatewayError::ProcessFailure { .. }
        )
    }

    /// Backoff hint carried by rate-limit errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            _ => None,
        }
    }

    /// Short machine-readable name, used for canonical `Error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Transport { .. } => "transport",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::ProviderOverloaded { .. } => "provider_overloaded",
            GatewayError::CircuitBreakerOpen { .. } => "circuit_breaker_open",
            GatewayError::ProcessFailure { .. } => "process_failure",
            GatewayError::Validation { .. } => "validation",
            GatewayError::ToolApprovalRequired(_) => "tool_approval_required",
            GatewayError::ToolExecution { .. } => "tool_execution",
            GatewayError::Provider { .. } => "provider",
            GatewayError::Parse { .. } => "parse",
            GatewayError::Config { .. } => "config",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::transport(e.to_string())
    }
}

impl From<ToolInvokeError> for GatewayError {
    fn from(e: ToolInvokeError) -> Self {
        let tool = e.tool_name().unwrap_or("deferred-queue").to_string();
        GatewayError::ToolExecution {
            tool,
            message: e.to_string(),
        }
    }
}

/// Map a non-success HTTP response to the taxonomy.
///
/// `retry_after_header` is the raw `Retry-After` value; only the
/// delta-seconds form is understood, an HTTP-date falls through to the body.
pub fn parse_http_error(
    status: u16,
    retry_after_header: Option<&str>,
    body: &str,
    provider: &str,
) -> GatewayError {
    let json: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = json
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error"))
        })
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| body.to_string());

    match status {
        429 => {
            let retry_after_seconds = retry_after_header
                .and_then(|h| h.trim().parse::<u64>().ok())
                .or_else(|| {
                    json.as_ref().and_then(|v| {
                        v.pointer("/error/retry_after")
                            .or_else(|| v.get("retry_after"))
                            .and_then(|r| {
                                r.as_u64()
                                    .or_else(|| r.as_f64().map(|f| f.ceil() as u64))
                            })
                    })
                });
            GatewayError::RateLimited {
                provider: provider.to_string(),
                message,
                retry_after_seconds,
            }
        }
        502 | 503 | 504 | 529 => GatewayError::ProviderOverloaded {
            provider: provider.to_string(),
            message,
        },
        _ => GatewayError::Provider {
            provider: provider.to_string(),
            status,
            message,
        },
    }
}
