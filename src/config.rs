//! Gateway Configuration
//!
//! Providers, their CLI and circuit-breaker settings, and the default
//! failover chain, loaded from a JSON or TOML file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use modelgate_llm::{CliSettings, GatewayError, GatewayResult, ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::failover::RetryAfterPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover: Option<FailoverEntry>,
}

/// One configured provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key. Used when `api_key` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<CliEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default)]
    pub program_args: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerEntry {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    30
}

impl Default for CircuitBreakerEntry {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntry {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEntry {
    pub candidates: Vec<CandidateEntry>,
    #[serde(default)]
    pub retry_after_policy: RetryAfterPolicy,
    /// Upper bound on any single retry-after sleep.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

fn default_max_retry_after_secs() -> u64 {
    60
}

impl GatewayConfig {
    /// Load and validate a config file. `.toml` files are parsed as TOML,
    /// `.json` files as JSON.
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => Self::from_json_str(&content)?,
            _ => {
                return Err(GatewayError::config(format!(
                    "unsupported config format: {}",
                    path.display()
                )))
            }
        };
        tracing::info!(
            "Loaded {} provider(s) from {}",
            config.providers.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> GatewayResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GatewayError::config(format!("invalid TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> GatewayResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| GatewayError::config(format!("invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the first problem found.
    pub fn validate(&self) -> GatewayResult<()> {
        let mut names = HashSet::new();
        for entry in &self.providers {
            if entry.name.trim().is_empty() {
                return Err(GatewayError::config("provider name must not be empty"));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(GatewayError::config(format!(
                    "duplicate provider name '{}'",
                    entry.name
                )));
            }
            entry.validate()?;
        }

        if let Some(failover) = &self.failover {
            if failover.candidates.is_empty() {
                return Err(GatewayError::config("failover needs at least one candidate"));
            }
            for candidate in &failover.candidates {
                if !names.contains(candidate.provider.as_str()) {
                    return Err(GatewayError::config(format!(
                        "failover candidate references unknown provider '{}'",
                        candidate.provider
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.iter().find(|p| p.name == name)
    }
}

impl ProviderEntry {
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            api_key: None,
            api_key_env: None,
            base_url: None,
            default_model: None,
            max_tokens: None,
            temperature: None,
            timeout_secs: None,
            proxy: None,
            cli: None,
            circuit_breaker: None,
        }
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.kind.is_cli() {
            return Ok(());
        }
        if self.default_model.is_none() && self.kind.default_model().is_none() {
            return Err(GatewayError::config(format!(
                "provider '{}' needs a default_model",
                self.name
            )));
        }
        if self.base_url.is_none() && self.kind.default_base_url().is_none() {
            return Err(GatewayError::config(format!(
                "provider '{}' needs a base_url",
                self.name
            )));
        }
        if let Some(breaker) = &self.circuit_breaker {
            if breaker.failure_threshold == 0 {
                return Err(GatewayError::config(format!(
                    "provider '{}': failure_threshold must be at least 1",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// The explicit key, else the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        let var = self.api_key_env.as_deref()?;
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Some(value),
            _ => {
                tracing::warn!("Provider '{}': environment variable {} is not set", self.name, var);
                None
            }
        }
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        let cli = self.cli.clone().unwrap_or_default();
        ProviderConfig {
            name: self.name.clone(),
            kind: self.kind,
            api_key: self.resolve_api_key(),
            base_url: self.base_url.clone(),
            default_model: self.default_model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.timeout_secs.map(Duration::from_secs),
            proxy: self.proxy.clone(),
            cli: CliSettings {
                program: cli.program,
                program_args: cli.program_args,
                extra_args: cli.extra_args,
                working_dir: cli.working_dir,
                idle_timeout: cli.idle_timeout_secs.map(Duration::from_secs),
                timeout: cli.timeout_secs.map(Duration::from_secs),
            },
        }
    }
}
