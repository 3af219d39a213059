//! HTTP Streaming Integration Tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use modelgate::core::encode_sse;
use modelgate::llm::collect_events;
use modelgate::{EventKind, FailoverChain, Message, ProviderRegistry, TextRequest, Usage};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{config, openai_entry, sse, weather_tools};

async fn weather_server() -> MockServer {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"{"choices":[{"delta":{"role":"assistant","content":"Let me check. "}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_w","type":"function","function":{"name":"weather","arguments":""}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\""}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"Tokyo\"}"}}]}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":10,"completion_tokens":5}}"#,
        "[DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_stream_orders_tool_events_and_reports_usage() {
    let server = weather_server().await;
    let registry = ProviderRegistry::from_config(&config(vec![openai_entry("openai", &server)])).unwrap();
    let provider = registry.get("openai").unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let request = TextRequest::new(vec![Message::user("Weather in Tokyo?")])
        .with_tools(weather_tools(runs.clone()));
    let events = collect_events(provider.stream_text(request).await.unwrap())
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        events.iter().filter(|e| matches!(e.kind, EventKind::StreamStart { .. })).count(),
        1
    );

    let call = events
        .iter()
        .position(|e| matches!(&e.kind, EventKind::ToolCall { call } if call.id == "call_w"))
        .unwrap();
    let result = events
        .iter()
        .position(|e| matches!(&e.kind, EventKind::ToolResult { result, .. } if result.tool_call_id == "call_w"))
        .unwrap();
    assert!(call < result);

    match &events[call].kind {
        EventKind::ToolCall { call } => {
            assert_eq!(call.arguments, serde_json::json!({"city": "Tokyo"}))
        }
        _ => unreachable!(),
    }

    let last = events.last().unwrap();
    match &last.kind {
        EventKind::StreamEnd { usage, .. } => assert_eq!(*usage, Usage::new(10, 5)),
        other => panic!("last event was {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_encodes_to_wire_protocol() {
    let server = weather_server().await;
    let registry = ProviderRegistry::from_config(&config(vec![openai_entry("openai", &server)])).unwrap();
    let chain = FailoverChain::single(Arc::new(registry), "openai");

    let request = TextRequest::new(vec![Message::user("Weather in Tokyo?")])
        .with_tools(weather_tools(Arc::default()));
    let stream = chain.stream_text(request).await.unwrap();
    let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
    let wire = encode_sse(&events);

    let types: Vec<String> = wire
        .split("\n\n")
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|payload| *payload != "[DONE]")
        .map(|payload| {
            let value: serde_json::Value = serde_json::from_str(payload).unwrap();
            value["type"].as_str().unwrap().to_string()
        })
        .collect();

    assert_eq!(types.first().map(String::as_str), Some("start"));
    assert_eq!(types.last().map(String::as_str), Some("finish"));
    for expected in ["text-delta", "tool-input-available", "tool-output-available"] {
        assert!(types.iter().any(|t| t == expected), "missing {}", expected);
    }
    assert!(wire.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn test_dropped_connection_has_no_stream_end() {
    let server = MockServer::start().await;
    let body = sse(&[r#"{"choices":[{"delta":{"content":"partial"}}]}"#]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;
    let registry = ProviderRegistry::from_config(&config(vec![openai_entry("openai", &server)])).unwrap();
    let provider = registry.get("openai").unwrap();

    let mut stream = provider
        .stream_text(TextRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap();
    let mut saw_end = false;
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => saw_end |= event.is_stream_end(),
            Err(e) => error = Some(e),
        }
    }
    assert!(!saw_end);
    let error = error.unwrap();
    assert!(matches!(error, modelgate::GatewayError::Transport { .. }));
    assert!(error.is_failoverable());
}
