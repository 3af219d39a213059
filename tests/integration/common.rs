//! Shared fixtures for integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use modelgate::core::{FunctionTool, Tool, ToolRegistry};
use modelgate::{GatewayConfig, ProviderEntry, ProviderKind};
use wiremock::MockServer;

/// An OpenAI provider entry pointed at a mock server.
pub fn openai_entry(name: &str, server: &MockServer) -> ProviderEntry {
    let mut entry = ProviderEntry::new(name, ProviderKind::OpenAI);
    entry.api_key = Some("sk-test".into());
    entry.base_url = Some(format!("{}/v1", server.uri()));
    entry.default_model = Some("gpt-4o".into());
    entry
}

pub fn config(providers: Vec<ProviderEntry>) -> GatewayConfig {
    GatewayConfig {
        providers,
        failover: None,
    }
}

/// SSE body from raw `data:` payloads.
pub fn sse(payloads: &[&str]) -> String {
    payloads.iter().map(|p| format!("data: {}\n\n", p)).collect()
}

/// `weather` tool that counts its runs.
pub fn weather_tools(runs: Arc<AtomicUsize>) -> ToolRegistry {
    let tool = FunctionTool::new(
        "weather",
        "Current weather for a city",
        serde_json::json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        move |_ctx, args| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({ "city": args["city"], "temp_c": 21 }))
            }
        },
    );
    ToolRegistry::from_tools([Arc::new(tool) as Arc<dyn Tool>])
}
