//! Provider Failover Chain
//!
//! Tries an ordered list of `(provider, model)` candidates. Failoverable
//! errors move on to the next candidate; any other error aborts the chain
//! immediately. When every candidate fails, the last error is returned as is.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{stream, StreamExt};
use modelgate_core::EventKind;
use modelgate_llm::{EventStream, GatewayError, GatewayResult, TextRequest, TextResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::FailoverEntry;
use crate::registry::{Provider, ProviderRegistry};

/// When to honor a rate-limit `retry_after` hint before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAfterPolicy {
    /// Move on immediately.
    Ignore,
    /// Wait only when the next candidate is the same provider.
    #[default]
    SameProvider,
    /// Wait before any next candidate.
    Always,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    pub retry_after_policy: RetryAfterPolicy,
    /// Cap on a single retry-after sleep.
    pub max_retry_after: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            retry_after_policy: RetryAfterPolicy::default(),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl From<&FailoverEntry> for FailoverConfig {
    fn from(entry: &FailoverEntry) -> Self {
        Self {
            retry_after_policy: entry.retry_after_policy,
            max_retry_after: Duration::from_secs(entry.max_retry_after_secs),
        }
    }
}

/// One `(provider, model)` pair. `None` means the provider's default model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub provider: String,
    pub model: Option<String>,
}

impl Candidate {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Notification sent each time the chain moves past a failed candidate.
#[derive(Debug, Clone)]
pub struct FailedOver {
    pub provider: String,
    pub model: Option<String>,
    pub error: GatewayError,
}

pub type FailoverObserver = Arc<dyn Fn(&FailedOver) + Send + Sync>;

/// Record of a single attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverAttempt {
    pub provider: String,
    pub model: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    /// RFC 3339 start time
    pub started_at: String,
}

impl FailoverAttempt {
    fn success(candidate: &Candidate, model: Option<String>, started_at: String, duration_ms: u64) -> Self {
        Self {
            provider: candidate.provider.clone(),
            model,
            success: true,
            error_message: None,
            duration_ms,
            started_at,
        }
    }

    fn failure(
        candidate: &Candidate,
        model: Option<String>,
        error: &GatewayError,
        started_at: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            provider: candidate.provider.clone(),
            model,
            success: false,
            error_message: Some(error.to_string()),
            duration_ms,
            started_at,
        }
    }
}

/// Every attempt one call made, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailoverLog {
    pub attempts: Vec<FailoverAttempt>,
    pub total_duration_ms: u64,
    pub successful_provider: Option<String>,
}

impl FailoverLog {
    fn add_attempt(&mut self, attempt: FailoverAttempt) {
        self.total_duration_ms += attempt.duration_ms;
        if attempt.success {
            self.successful_provider = Some(attempt.provider.clone());
        }
        self.attempts.push(attempt);
    }

    pub fn failed_attempts_count(&self) -> usize {
        self.attempts.iter().filter(|a| !a.success).count()
    }
}

/// Ordered failover over registered providers. Holds no state between calls.
#[derive(Clone)]
pub struct FailoverChain {
    registry: Arc<ProviderRegistry>,
    candidates: Vec<Candidate>,
    config: FailoverConfig,
    observers: Vec<FailoverObserver>,
}

impl std::fmt::Debug for FailoverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverChain")
            .field("candidates", &self.candidates)
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl FailoverChain {
    pub fn new(registry: Arc<ProviderRegistry>, candidates: Vec<Candidate>) -> Self {
        Self {
            registry,
            candidates,
            config: FailoverConfig::default(),
            observers: Vec::new(),
        }
    }

    /// A one-element chain.
    pub fn single(registry: Arc<ProviderRegistry>, provider: impl Into<String>) -> Self {
        Self::new(registry, vec![Candidate::new(provider)])
    }

    pub fn from_entry(registry: Arc<ProviderRegistry>, entry: &FailoverEntry) -> Self {
        let candidates = entry
            .candidates
            .iter()
            .map(|c| Candidate {
                provider: c.provider.clone(),
                model: c.model.clone(),
            })
            .collect();
        Self::new(registry, candidates).with_config(FailoverConfig::from(entry))
    }

    pub fn with_config(mut self, config: FailoverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_failed_over<F>(mut self, observer: F) -> Self
    where
        F: Fn(&FailedOver) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Run `operation` against each candidate until one succeeds.
    ///
    /// The operation receives the provider and the resolved model.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> GatewayResult<(T, FailoverLog)>
    where
        F: FnMut(Arc<Provider>, Option<String>) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        if self.candidates.is_empty() {
            return Err(GatewayError::config("failover chain has no candidates"));
        }

        let mut log = FailoverLog::default();
        let mut last_error = None;

        for (index, candidate) in self.candidates.iter().enumerate() {
            let provider = self.registry.get(&candidate.provider).ok_or_else(|| {
                GatewayError::config(format!("unknown provider '{}'", candidate.provider))
            })?;
            let model = provider.resolve_model(candidate.model.as_deref());

            info!(
                "Attempting provider {} (model {})",
                candidate.provider,
                model.as_deref().unwrap_or("default")
            );
            let started_at = chrono::Utc::now().to_rfc3339();
            let attempt_start = Instant::now();

            match operation(provider, model.clone()).await {
                Ok(result) => {
                    let duration_ms = attempt_start.elapsed().as_millis() as u64;
                    info!("Provider {} succeeded in {}ms", candidate.provider, duration_ms);
                    log.add_attempt(FailoverAttempt::success(candidate, model, started_at, duration_ms));
                    return Ok((result, log));
                }
                Err(e) => {
                    let duration_ms = attempt_start.elapsed().as_millis() as u64;
                    log.add_attempt(FailoverAttempt::failure(
                        candidate,
                        model.clone(),
                        &e,
                        started_at,
                        duration_ms,
                    ));

                    if !e.is_failoverable() {
                        error!("Provider {} failed with non-failoverable error: {}", candidate.provider, e);
                        return Err(e);
                    }

                    warn!("Provider {} failed, failing over: {}", candidate.provider, e);
                    let notice = FailedOver {
                        provider: candidate.provider.clone(),
                        model,
                        error: e.clone(),
                    };
                    for observer in &self.observers {
                        observer(&notice);
                    }

                    if let Some(next) = self.candidates.get(index + 1) {
                        if let Some(delay) = self.backoff(&e, candidate, next) {
                            debug!("Waiting {}ms (retry-after) before next attempt", delay.as_millis());
                            tokio::time::sleep(delay).await;
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        error!("All {} failover candidates failed", log.attempts.len());
        Err(last_error.unwrap_or_else(|| GatewayError::config("failover chain has no candidates")))
    }

    fn backoff(&self, error: &GatewayError, current: &Candidate, next: &Candidate) -> Option<Duration> {
        let seconds = error.retry_after()?;
        let wait = match self.config.retry_after_policy {
            RetryAfterPolicy::Ignore => false,
            RetryAfterPolicy::SameProvider => current.provider == next.provider,
            RetryAfterPolicy::Always => true,
        };
        wait.then(|| Duration::from_secs(seconds).min(self.config.max_retry_after))
    }

    pub async fn generate_text(&self, request: TextRequest) -> GatewayResult<TextResponse> {
        let (response, _) = self.generate_text_logged(request).await?;
        Ok(response)
    }

    pub async fn generate_text_logged(&self, request: TextRequest) -> GatewayResult<(TextResponse, FailoverLog)> {
        self.execute(|provider, model| {
            let request = with_model(request.clone(), model);
            async move { provider.generate_text(request).await }
        })
        .await
    }

    /// Open a stream on the first candidate that starts producing output.
    ///
    /// A candidate counts as started once it yields something other than
    /// `StreamStart`; failures before that fail over like blocking calls.
    /// Failures after output has reached the caller end the stream.
    pub async fn stream_text(&self, request: TextRequest) -> GatewayResult<EventStream> {
        let (stream, _) = self
            .execute(|provider, model| {
                let request = with_model(request.clone(), model);
                async move { open_stream(&provider, request).await }
            })
            .await?;
        Ok(stream)
    }
}

fn with_model(mut request: TextRequest, model: Option<String>) -> TextRequest {
    if model.is_some() {
        request.model = model;
    }
    request
}

async fn open_stream(provider: &Provider, request: TextRequest) -> GatewayResult<EventStream> {
    let mut inner = provider.stream_text(request).await?;
    let mut head = Vec::new();
    while let Some(item) = inner.next().await {
        let event = item?;
        let started = !matches!(event.kind, EventKind::StreamStart { .. });
        head.push(event);
        if started {
            break;
        }
    }
    Ok(Box::pin(stream::iter(head.into_iter().map(Ok)).chain(inner)))
}
