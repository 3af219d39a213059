//! Circuit Breaker
//!
//! Per-provider health gate. After `failure_threshold` consecutive
//! failoverable failures the breaker opens and calls are refused with
//! `CircuitBreakerOpen` until `cooldown` has passed. The first call after the
//! cooldown is let through; its outcome closes or re-opens the breaker.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use modelgate_llm::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown elapsed; the next call is a probe.
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn state(&self) -> CircuitState {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.opened_at {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() < self.cooldown => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .consecutive_failures
    }

    /// Refuse the call while open.
    pub fn check(&self, provider: &str) -> GatewayResult<()> {
        match self.state() {
            CircuitState::Open => {
                tracing::debug!("Circuit breaker open for {}, refusing call", provider);
                Err(GatewayError::CircuitBreakerOpen {
                    provider: provider.to_string(),
                })
            }
            CircuitState::HalfOpen => {
                tracing::debug!("Circuit breaker for {} half-open, probing", provider);
                Ok(())
            }
            CircuitState::Closed => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.opened_at.is_some() {
            tracing::info!("Circuit breaker closed after successful probe");
        }
        *state = BreakerState::default();
    }

    /// Count a failure. Only failoverable errors say anything about provider
    /// health; caller mistakes and tool failures are ignored.
    pub fn record_failure(&self, provider: &str, error: &GatewayError) {
        if !error.is_failoverable() || matches!(error, GatewayError::CircuitBreakerOpen { .. }) {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.failure_threshold {
            if state.opened_at.is_none() {
                tracing::warn!(
                    "Circuit breaker opened for {} after {} consecutive failures",
                    provider,
                    state.consecutive_failures
                );
            }
            state.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overloaded() -> GatewayError {
        GatewayError::ProviderOverloaded {
            provider: "p".into(),
            message: "busy".into(),
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure("p", &overloaded());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check("p").is_ok());

        breaker.record_failure("p", &overloaded());
        assert_eq!(breaker.state(), CircuitState::Open);
        let err = breaker.check("p").unwrap_err();
        assert!(matches!(err, GatewayError::CircuitBreakerOpen { ref provider } if provider == "p"));
        assert!(err.is_failoverable());
    }

    #[test]
    fn test_success_resets() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure("p", &overloaded());
        breaker.record_success();
        breaker.record_failure("p", &overloaded());
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_fatal_errors_do_not_count() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("p", &GatewayError::validation("bad request"));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure("p", &overloaded());
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.check("p").is_ok());

        // Failed probe re-opens immediately.
        breaker.record_failure("p", &overloaded());
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
