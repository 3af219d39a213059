//! OpenAI-Compatible HTTP Gateway
//!
//! One implementation serves every backend that speaks the
//! `/chat/completions` protocol: OpenAI, DeepSeek, Ollama's OpenAI endpoint
//! and generic compatible servers. Kind-specific differences (tool support,
//! token limit field, response format) are resolved per request.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use modelgate_core::{FinishReason, StreamEvent, Tool, ToolCall, ToolResult, Usage};
use modelgate_tools::{ToolInvoker, ToolOutcome, ToolRuntime};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{parse_http_error, GatewayError, GatewayResult};
use crate::fragments::ToolCallAccumulator;
use crate::gateway::{stream_end, EventStream, Gateway, PartTracker};
use crate::http_client::build_http_client;
use crate::sse::{parse_sse, ChunkEvent, ChunkUsage};
use crate::types::{Message, ProviderConfig, ProviderKind, Role, TextRequest, TextResponse};

/// Gateway for OpenAI-style chat completion APIs.
#[derive(Clone)]
pub struct OpenAIGateway {
    config: Arc<ProviderConfig>,
    client: reqwest::Client,
    runtime: ToolRuntime,
}

impl OpenAIGateway {
    pub fn new(config: ProviderConfig) -> GatewayResult<Self> {
        if config.kind.is_cli() {
            return Err(GatewayError::config(format!(
                "provider '{}' is a CLI provider, not an HTTP one",
                config.name
            )));
        }
        let client = build_http_client(config.proxy.as_deref())?;
        Ok(Self {
            config: Arc::new(config),
            client,
            runtime: ToolRuntime::default(),
        })
    }

    /// Validate the request and resolve everything needed before any I/O.
    fn prepare(&self, request: TextRequest) -> GatewayResult<HttpCall> {
        let model = request
            .model
            .clone()
            .or_else(|| self.config.resolved_default_model())
            .ok_or_else(|| {
                GatewayError::config(format!("no model configured for '{}'", self.config.name))
            })?;
        if !request.tools.is_empty() && !supports_tools(self.config.kind, &model) {
            return Err(GatewayError::validation(format!(
                "model '{}' does not support tool calling",
                model
            )));
        }
        let base_url = self.config.resolved_base_url().ok_or_else(|| {
            GatewayError::config(format!("no base_url configured for '{}'", self.config.name))
        })?;
        if self.config.kind.requires_api_key() && self.config.api_key.is_none() {
            return Err(GatewayError::config(format!(
                "API key not configured for {}",
                self.config.name
            )));
        }
        let invoker = self.runtime.invoker(
            request.tools.clone(),
            request.invocation_id.clone(),
            request.agent_identity.clone(),
        );
        Ok(HttpCall {
            config: self.config.clone(),
            client: self.client.clone(),
            endpoint: format!("{}/chat/completions", base_url),
            model,
            request,
            invoker: Arc::new(invoker),
        })
    }
}

#[async_trait]
impl Gateway for OpenAIGateway {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn tool_runtime(&self) -> &ToolRuntime {
        &self.runtime
    }

    fn with_tool_runtime(mut self, runtime: ToolRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    async fn generate_text(&self, request: TextRequest) -> GatewayResult<TextResponse> {
        let call = self.prepare(request)?;
        let max_steps = call.request.options.max_steps.max(1);
        let mut messages = call.request.messages.clone();
        let mut response = TextResponse {
            model: call.model.clone(),
            provider: call.config.name.clone(),
            ..Default::default()
        };

        for step in 0..max_steps {
            let http = call.send(&messages, false).await?;
            let body_text = http.text().await?;
            let body: CompletionBody = serde_json::from_str(&body_text)
                .map_err(|e| GatewayError::parse(format!("Failed to parse response: {}", e)))?;
            let completion = body.into_completion();

            response.usage.accumulate(&completion.usage);
            response.finish_reason = completion.finish_reason.clone();
            response.text = completion.text.clone();
            if let Some(model) = completion.model {
                response.model = model;
            }
            if completion.tool_calls.is_empty() {
                break;
            }

            let mut results = Vec::new();
            let mut all_real = true;
            for tool_call in &completion.tool_calls {
                let executed = execute_call(&call.invoker, tool_call).await?;
                all_real &= !executed.deferred;
                results.push(executed.result);
            }
            response.tool_calls.extend(completion.tool_calls.iter().cloned());
            response.tool_results.extend(results.iter().cloned());

            if step + 1 < max_steps && all_real {
                messages.push(Message::assistant_with_tool_calls(
                    completion.text,
                    completion.tool_calls,
                ));
                messages.push(Message::tool_results(results));
                continue;
            }
            break;
        }

        if call.request.schema.is_some() {
            response.structured = serde_json::from_str(response.text.trim()).ok();
        }
        tracing::debug!(
            "{} generate_text finished: {} prompt / {} completion tokens",
            call.config.name,
            response.usage.prompt_tokens,
            response.usage.completion_tokens
        );
        Ok(response)
    }

    async fn stream_text(&self, request: TextRequest) -> GatewayResult<EventStream> {
        let call = self.prepare(request)?;
        let first = call.send(&call.request.messages, true).await?;

        let stream = try_stream! {
            yield StreamEvent::stream_start(call.model.clone(), call.config.name.clone());

            let max_steps = call.request.options.max_steps.max(1);
            let mut messages = call.request.messages.clone();
            let mut pending_response = Some(first);
            let mut usage = Usage::default();
            let mut finish: Option<FinishReason> = None;

            for step in 0..max_steps {
                let http = match pending_response.take() {
                    Some(http) => http,
                    None => call.send(&messages, true).await?,
                };
                let mut body = Box::pin(http.bytes_stream());
                let mut buffer: Vec<u8> = Vec::new();
                let mut fragments = ToolCallAccumulator::new();
                let mut parts = PartTracker::default();
                let mut step_text = String::new();
                let mut step_usage: Option<Usage> = None;
                let mut terminal = false;

                'read: while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(GatewayError::from)?;
                    buffer.extend_from_slice(&chunk);
                    let (events, rest) = parse_sse(&buffer);
                    buffer = rest;
                    for event in events {
                        match event {
                            ChunkEvent::TextDelta(text) => {
                                step_text.push_str(&text);
                                for e in parts.text(text) {
                                    yield e;
                                }
                            }
                            ChunkEvent::ReasoningDelta(text) => {
                                for e in parts.reasoning(text) {
                                    yield e;
                                }
                            }
                            ChunkEvent::ToolCallDelta { index, id, name, arguments } => {
                                fragments.push(index, id.as_deref(), name.as_deref(), &arguments);
                            }
                            ChunkEvent::Finish(reason) => {
                                finish = Some(FinishReason::from(reason.as_str()));
                                terminal = true;
                            }
                            ChunkEvent::Usage(u) => {
                                step_usage = Some(u);
                                terminal = true;
                            }
                            ChunkEvent::Done => {
                                terminal = true;
                                break 'read;
                            }
                        }
                    }
                }

                if !terminal {
                    tracing::warn!("{} stream ended before a terminal event", call.config.name);
                    Err::<(), _>(GatewayError::transport("stream ended before a terminal event"))?;
                }
                for e in parts.close() {
                    yield e;
                }
                if let Some(u) = step_usage {
                    usage.accumulate(&u);
                }

                let tool_calls = fragments.drain();
                if tool_calls.is_empty() {
                    break;
                }

                let mut results = Vec::new();
                let mut all_real = true;
                for tool_call in &tool_calls {
                    yield StreamEvent::tool_call(tool_call.clone());
                    let outcome = execute_call(&call.invoker, tool_call).await;
                    if let Err(GatewayError::ToolExecution { message, .. }) = &outcome {
                        yield StreamEvent::tool_result(
                            ToolResult::for_call(tool_call, Value::String(message.clone())),
                            false,
                            Some(message.clone()),
                        );
                    }
                    let executed = outcome?;
                    all_real &= !executed.deferred;
                    yield StreamEvent::tool_result(
                        executed.result.clone(),
                        executed.successful,
                        executed.error.clone(),
                    );
                    results.push(executed.result);
                }

                if step + 1 < max_steps && all_real {
                    messages.push(Message::assistant_with_tool_calls(step_text, tool_calls));
                    messages.push(Message::tool_results(results));
                    continue;
                }
                break;
            }

            yield stream_end(finish, usage);
        };

        Ok(Box::pin(stream))
    }
}

// ============================================================================
// Per-call state
// ============================================================================

/// Everything one call needs, owned so a stream can outlive the gateway borrow.
struct HttpCall {
    config: Arc<ProviderConfig>,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    request: TextRequest,
    invoker: Arc<ToolInvoker>,
}

impl HttpCall {
    /// Issue one request and map non-success statuses.
    async fn send(&self, messages: &[Message], stream: bool) -> GatewayResult<reqwest::Response> {
        let body = build_request_body(&self.config, &self.model, &self.request, messages, stream);
        tracing::debug!(
            "POST {} (model {}, stream {}, {} messages)",
            self.endpoint,
            self.model,
            stream,
            messages.len()
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(timeout) = self.request.timeout.or(self.config.timeout) {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body_text = response.text().await.unwrap_or_default();
        let err = parse_http_error(status, retry_after.as_deref(), &body_text, &self.config.name);
        tracing::warn!("{} request failed: {}", self.config.name, err);
        Err(err)
    }
}

/// A tool call after the invocation loop has dealt with it.
struct ExecutedCall {
    result: ToolResult,
    successful: bool,
    error: Option<String>,
    deferred: bool,
}

async fn execute_call(invoker: &ToolInvoker, call: &ToolCall) -> GatewayResult<ExecutedCall> {
    match invoker.invoke(call).await? {
        ToolOutcome::Executed(result) => Ok(ExecutedCall {
            result,
            successful: true,
            error: None,
            deferred: false,
        }),
        ToolOutcome::Rejected { result, reason } => Ok(ExecutedCall {
            result,
            successful: false,
            error: Some(reason.unwrap_or_else(|| "rejected by approver".to_string())),
            deferred: false,
        }),
        ToolOutcome::Deferred { result, .. } => Ok(ExecutedCall {
            result,
            successful: true,
            error: None,
            deferred: true,
        }),
        ToolOutcome::AwaitingApproval(pending) => Err(GatewayError::ToolApprovalRequired(pending)),
    }
}

// ============================================================================
// Request building
// ============================================================================

/// Whether `model` on `kind` accepts a `tools` parameter at all.
pub fn supports_tools(kind: ProviderKind, model: &str) -> bool {
    let model = model.to_lowercase();
    match kind {
        ProviderKind::OpenAI => {
            !(model.starts_with("o1-mini")
                || model.starts_with("o1-preview")
                || model.ends_with("-instruct")
                || model.contains("-instruct-"))
        }
        ProviderKind::DeepSeek => !model.starts_with("deepseek-reasoner"),
        ProviderKind::Ollama | ProviderKind::OpenAICompatible => true,
        ProviderKind::ClaudeCode => false,
    }
}

/// o-series and gpt-5 models take `max_completion_tokens` and no temperature.
fn is_reasoning_model(model: &str) -> bool {
    let model = model.to_lowercase();
    model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
        || model.starts_with("gpt-5")
}

pub(crate) fn build_request_body(
    config: &ProviderConfig,
    model: &str,
    request: &TextRequest,
    messages: &[Message],
    stream: bool,
) -> Value {
    let mut body = serde_json::json!({
        "model": model,
        "stream": stream,
    });

    let reasoning = is_reasoning_model(model);
    if let Some(max_tokens) = request.options.max_tokens.or(config.max_tokens) {
        let field = if reasoning { "max_completion_tokens" } else { "max_tokens" };
        body[field] = serde_json::json!(max_tokens);
    }
    if !reasoning {
        if let Some(temperature) = request.options.temperature.or(config.temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }
    }

    let mut wire_messages: Vec<Value> = Vec::new();
    let mut system = request.instructions.clone().unwrap_or_default();
    if let Some(schema) = &request.schema {
        match config.kind {
            ProviderKind::DeepSeek | ProviderKind::Ollama => {
                body["response_format"] = serde_json::json!({ "type": "json_object" });
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&format!(
                    "Respond with a single JSON object matching this schema:\n{}",
                    schema
                ));
            }
            _ => {
                body["response_format"] = serde_json::json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "response",
                        "schema": schema,
                        "strict": true
                    }
                });
            }
        }
    }
    if !system.is_empty() {
        wire_messages.push(serde_json::json!({ "role": "system", "content": system }));
    }
    for message in messages {
        wire_messages.extend(message_to_openai(message));
    }
    body["messages"] = Value::Array(wire_messages);

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .tools()
            .iter()
            .map(|t| tool_to_openai(t.as_ref()))
            .collect();
        body["tools"] = Value::Array(tools);
    }

    if stream {
        body["stream_options"] = serde_json::json!({ "include_usage": true });
    }
    body
}

/// Convert one message. Tool-result messages fan out to one `tool` message per result.
fn message_to_openai(message: &Message) -> Vec<Value> {
    match message.role {
        Role::ToolResult => message
            .tool_results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "role": "tool",
                    "tool_call_id": r.tool_call_id,
                    "content": r.content_text(),
                })
            })
            .collect(),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string()
                        }
                    })
                })
                .collect();
            // Some compatible servers require the content key even when empty.
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                Value::String(message.content.clone())
            };
            vec![serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
            })]
        }
        Role::Assistant => vec![serde_json::json!({
            "role": "assistant",
            "content": message.content,
        })],
        Role::User if !message.attachments.is_empty() => {
            let mut parts = vec![serde_json::json!({ "type": "text", "text": message.content })];
            for attachment in &message.attachments {
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": attachment.as_url() }
                }));
            }
            vec![serde_json::json!({ "role": "user", "content": parts })]
        }
        Role::User => vec![serde_json::json!({
            "role": "user",
            "content": message.content,
        })],
    }
}

fn tool_to_openai(tool: &dyn Tool) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name(),
            "description": tool.description(),
            "parameters": tool.parameters_schema()
        }
    })
}

// ============================================================================
// Blocking response format
// ============================================================================

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

struct Completion {
    model: Option<String>,
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Usage,
}

impl CompletionBody {
    fn into_completion(self) -> Completion {
        let choice = self.choices.into_iter().next();
        let finish_reason = choice
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(FinishReason::from);
        let (text, tool_calls) = match choice.and_then(|c| c.message) {
            Some(message) => {
                let mut accumulator = ToolCallAccumulator::new();
                for (index, tc) in message.tool_calls.iter().enumerate() {
                    accumulator.push(
                        index,
                        Some(&tc.id),
                        Some(&tc.function.name),
                        &tc.function.arguments,
                    );
                }
                (message.content.unwrap_or_default(), accumulator.drain())
            }
            None => (String::new(), Vec::new()),
        };
        Completion {
            model: self.model,
            text,
            tool_calls,
            finish_reason,
            usage: self.usage.map(Usage::from).unwrap_or_default(),
        }
    }
}
