//! Failover Integration Tests

use std::sync::{Arc, Mutex};

use modelgate::{
    Candidate, FailedOver, FailoverChain, GatewayError, Message, ProviderRegistry, TextRequest,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{config, openai_entry, weather_tools};

fn completion(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"content": text}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 4, "completion_tokens": 1}
    })
}

#[tokio::test]
async fn test_rate_limited_provider_fails_over() {
    let a = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(serde_json::json!({"error": {"message": "slow down"}})),
        )
        .expect(1)
        .mount(&a)
        .await;
    let b = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&b)
        .await;

    let registry = ProviderRegistry::from_config(&config(vec![
        openai_entry("a", &a),
        openai_entry("b", &b),
    ]))
    .unwrap();

    let seen: Arc<Mutex<Vec<FailedOver>>> = Arc::default();
    let sink = seen.clone();
    let chain = FailoverChain::new(Arc::new(registry), vec![Candidate::new("a"), Candidate::new("b")])
        .on_failed_over(move |f| sink.lock().unwrap().push(f.clone()));

    let response = chain
        .generate_text(TextRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap();
    assert_eq!(response.text, "ok");
    assert_eq!(response.provider, "b");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].provider, "a");
    assert_eq!(seen[0].error.retry_after(), Some(7));
}

#[tokio::test]
async fn test_validation_failure_never_reaches_next_provider() {
    let a = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("unused")))
        .expect(0)
        .mount(&a)
        .await;
    let b = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(0)
        .mount(&b)
        .await;

    let registry = ProviderRegistry::from_config(&config(vec![
        openai_entry("a", &a),
        openai_entry("b", &b),
    ]))
    .unwrap();
    let chain = FailoverChain::new(
        Arc::new(registry),
        vec![Candidate::new("a").with_model("o1-mini"), Candidate::new("b")],
    );

    let request = TextRequest::new(vec![Message::user("weather?")])
        .with_tools(weather_tools(Arc::default()));
    let err = chain.generate_text(request).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation { .. }));
}

#[tokio::test]
async fn test_overloaded_everywhere_surfaces_last_error() {
    let a = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream busy"))
        .mount(&a)
        .await;
    let b = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded_error"))
        .mount(&b)
        .await;

    let registry = ProviderRegistry::from_config(&config(vec![
        openai_entry("a", &a),
        openai_entry("b", &b),
    ]))
    .unwrap();
    let chain = FailoverChain::new(Arc::new(registry), vec![Candidate::new("a"), Candidate::new("b")]);

    let err = chain
        .generate_text(TextRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();
    match err {
        GatewayError::ProviderOverloaded { provider, .. } => assert_eq!(provider, "b"),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_circuit_breaker_skips_unhealthy_provider() {
    let a = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&a)
        .await;
    let b = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(2)
        .mount(&b)
        .await;

    let mut entry_a = openai_entry("a", &a);
    entry_a.circuit_breaker = Some(modelgate::CircuitBreakerEntry {
        failure_threshold: 1,
        cooldown_secs: 300,
    });
    let registry = ProviderRegistry::from_config(&config(vec![entry_a, openai_entry("b", &b)])).unwrap();

    let seen: Arc<Mutex<Vec<FailedOver>>> = Arc::default();
    let sink = seen.clone();
    let chain = FailoverChain::new(Arc::new(registry), vec![Candidate::new("a"), Candidate::new("b")])
        .on_failed_over(move |f| sink.lock().unwrap().push(f.clone()));

    for _ in 0..2 {
        let response = chain
            .generate_text(TextRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.text, "ok");
    }

    // Second call was refused by the open breaker without a request to `a`.
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0].error, GatewayError::ProviderOverloaded { .. }));
    assert!(matches!(seen[1].error, GatewayError::CircuitBreakerOpen { .. }));
}
