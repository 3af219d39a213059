//! Approval and Deferred Tool Integration Tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use modelgate::core::{FunctionTool, Tool, ToolRegistry};
use modelgate::tools::{
    ApprovalStore, DeferredRunner, InMemoryApprovalStore, InMemoryDeferredQueue, ToolRuntime,
};
use modelgate::{GatewayError, Message, ProviderRegistry, TextRequest};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{config, openai_entry};

fn tool_call_response(name: &str, arguments: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {"content": null, "tool_calls": [{
                "id": "call_1", "type": "function",
                "function": {"name": name, "arguments": arguments}
            }]},
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 8, "completion_tokens": 4}
    })
}

fn counting_tool(name: &str, runs: Arc<AtomicUsize>) -> FunctionTool {
    FunctionTool::new(name, "Side-effecting tool", serde_json::json!({}), move |_, args| {
        let runs = runs.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "done": args }))
        }
    })
}

#[tokio::test]
async fn test_approval_gate_then_reinvoke() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_response(
            "drop_table",
            r#"{"table":"users"}"#,
        )))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryApprovalStore::new());
    let runtime = ToolRuntime::new().with_approval_store(store.clone());
    let registry =
        ProviderRegistry::from_config_with_runtime(&config(vec![openai_entry("openai", &server)]), runtime)
            .unwrap();
    let provider = registry.get("openai").unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let tools = ToolRegistry::from_tools([
        Arc::new(counting_tool("drop_table", runs.clone()).with_approval()) as Arc<dyn Tool>
    ]);
    let request = TextRequest::new(vec![Message::user("clean up")])
        .with_tools(tools)
        .with_invocation_id("inv-approval");

    let pending = match provider.generate_text(request.clone()).await {
        Err(GatewayError::ToolApprovalRequired(pending)) => pending,
        other => panic!("expected approval request, got {:?}", other),
    };
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(store.pending_calls().await.len(), 1);

    store.record_approval(&pending.id, true, None).await;
    let response = provider.generate_text(request).await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(response.tool_results.len(), 1);
    assert_eq!(response.tool_results[0].tool_call_id, "call_1");
    assert_eq!(
        response.tool_results[0].result,
        serde_json::json!({"done": {"table": "users"}})
    );
}

#[tokio::test]
async fn test_rejected_call_returns_rejection_without_running() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_response(
            "drop_table",
            r#"{"table":"orders"}"#,
        )))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryApprovalStore::new());
    let runtime = ToolRuntime::new().with_approval_store(store.clone());
    let registry =
        ProviderRegistry::from_config_with_runtime(&config(vec![openai_entry("openai", &server)]), runtime)
            .unwrap();
    let provider = registry.get("openai").unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let tools = ToolRegistry::from_tools([
        Arc::new(counting_tool("drop_table", runs.clone()).with_approval()) as Arc<dyn Tool>
    ]);
    let request = TextRequest::new(vec![Message::user("clean up")])
        .with_tools(tools)
        .with_invocation_id("inv-reject");

    let pending = match provider.generate_text(request.clone()).await {
        Err(GatewayError::ToolApprovalRequired(pending)) => pending,
        other => panic!("expected approval request, got {:?}", other),
    };
    store
        .record_approval(&pending.id, false, Some("not today".into()))
        .await;

    let response = provider.generate_text(request).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(response.tool_results.len(), 1);
    assert!(response.tool_results[0].content_text().contains("not today"));
}

#[tokio::test]
async fn test_deferred_tool_queued_then_resumed_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_response(
            "build_report",
            r#"{"quarter":"Q3"}"#,
        )))
        // A placeholder result is not fed back to the model, even with steps left.
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(InMemoryDeferredQueue::new());
    let runtime = ToolRuntime::new().with_deferred_queue(queue.clone());
    let registry =
        ProviderRegistry::from_config_with_runtime(&config(vec![openai_entry("openai", &server)]), runtime)
            .unwrap();
    let provider = registry.get("openai").unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let tool: Arc<dyn Tool> = Arc::new(
        counting_tool("build_report", runs.clone())
            .deferred()
            .with_class_name("reports::BuildReport"),
    );
    let tools = ToolRegistry::from_tools([tool]);
    let request = TextRequest::new(vec![Message::user("Q3 report please")])
        .with_tools(tools.clone())
        .with_max_steps(2);

    let response = provider.generate_text(request).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(response.tool_results[0].result["status"], "pending");

    let job = queue.pop().await.unwrap();
    assert_eq!(job.tool_class, "reports::BuildReport");
    assert_eq!(job.arguments, serde_json::json!({"quarter": "Q3"}));
    assert_eq!(response.tool_results[0].result["call_id"], job.call_id.as_str());

    // At-least-once delivery: the job may arrive twice.
    let runner = DeferredRunner::new(tools);
    let first = runner.resume_job(&job).await.unwrap();
    let again = runner.resume_job(&job).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(first.tool_call_id, response.tool_results[0].tool_call_id);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(first.result, serde_json::json!({"done": {"quarter": "Q3"}}));
}
