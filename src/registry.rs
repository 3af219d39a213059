//! Provider Registry
//!
//! Maps provider names to their gateway, default model and circuit breaker.
//! The gateway implementation is chosen from the provider kind once, when
//! the provider is built.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use modelgate_core::EventKind;
use modelgate_llm::{
    ClaudeCodeGateway, EventStream, Gateway, GatewayError, GatewayResult, OpenAIGateway,
    ProviderConfig, ProviderKind, TextRequest, TextResponse,
};
use modelgate_tools::ToolRuntime;

use crate::circuit::CircuitBreaker;
use crate::config::{GatewayConfig, ProviderEntry};

/// Build the gateway for a provider kind.
pub fn build_gateway(config: ProviderConfig, runtime: ToolRuntime) -> GatewayResult<Arc<dyn Gateway>> {
    let gateway: Arc<dyn Gateway> = match config.kind {
        ProviderKind::ClaudeCode => Arc::new(ClaudeCodeGateway::new(config)?.with_tool_runtime(runtime)),
        ProviderKind::OpenAI
        | ProviderKind::DeepSeek
        | ProviderKind::Ollama
        | ProviderKind::OpenAICompatible => {
            Arc::new(OpenAIGateway::new(config)?.with_tool_runtime(runtime))
        }
    };
    Ok(gateway)
}

/// A registered provider: its gateway plus health state.
pub struct Provider {
    name: String,
    gateway: Arc<dyn Gateway>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl Provider {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            name: gateway.name().to_string(),
            gateway,
            breaker: None,
        }
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(Arc::new(breaker));
        self
    }

    pub fn from_entry(entry: &ProviderEntry, runtime: ToolRuntime) -> GatewayResult<Self> {
        let provider = Self::new(build_gateway(entry.to_provider_config(), runtime)?);
        Ok(match &entry.circuit_breaker {
            Some(cb) => provider.with_circuit_breaker(CircuitBreaker::new(
                cb.failure_threshold,
                Duration::from_secs(cb.cooldown_secs),
            )),
            None => provider,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.gateway.config().kind
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_deref()
    }

    pub fn default_model(&self) -> Option<String> {
        self.gateway.config().resolved_default_model()
    }

    /// The requested model, else the provider default.
    pub fn resolve_model(&self, model: Option<&str>) -> Option<String> {
        model.map(str::to_string).or_else(|| self.default_model())
    }

    fn check(&self) -> GatewayResult<()> {
        match &self.breaker {
            Some(breaker) => breaker.check(&self.name),
            None => Ok(()),
        }
    }

    fn record<T>(&self, result: &GatewayResult<T>) {
        if let Some(breaker) = &self.breaker {
            match result {
                Ok(_) => breaker.record_success(),
                Err(e) => breaker.record_failure(&self.name, e),
            }
        }
    }

    pub async fn generate_text(&self, request: TextRequest) -> GatewayResult<TextResponse> {
        self.check()?;
        let result = self.gateway.generate_text(request).await;
        self.record(&result);
        result
    }

    /// Open a stream. The breaker sees the stream's outcome: its end event or
    /// its terminal error.
    pub async fn stream_text(&self, request: TextRequest) -> GatewayResult<EventStream> {
        self.check()?;
        let result = self.gateway.stream_text(request).await;
        if result.is_err() {
            self.record(&result);
        }
        let stream = result?;
        let Some(breaker) = self.breaker.clone() else {
            return Ok(stream);
        };
        let name = self.name.clone();
        Ok(Box::pin(stream.inspect(move |item| match item {
            Ok(event) if matches!(event.kind, EventKind::StreamEnd { .. }) => breaker.record_success(),
            Ok(_) => {}
            Err(e) => breaker.record_failure(&name, e),
        })))
    }
}

/// All configured providers, by name.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<Provider>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        Self::from_config_with_runtime(config, ToolRuntime::default())
    }

    /// Build every provider, sharing one tool runtime so approvals recorded
    /// through any of them are visible to all.
    pub fn from_config_with_runtime(config: &GatewayConfig, runtime: ToolRuntime) -> GatewayResult<Self> {
        config.validate()?;
        let mut registry = Self::new();
        for entry in &config.providers {
            registry.register(Provider::from_entry(entry, runtime.clone())?)?;
        }
        tracing::info!("Registered providers: {}", registry.order.join(", "));
        Ok(registry)
    }

    pub fn register(&mut self, provider: Provider) -> GatewayResult<()> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(GatewayError::config(format!(
                "provider '{}' is already registered",
                name
            )));
        }
        self.order.push(name.clone());
        self.providers.insert(name, Arc::new(provider));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers.get(name).cloned()
    }

    /// Provider names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
