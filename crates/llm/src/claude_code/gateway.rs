//! Claude Code Gateway
//!
//! Continuation calls resume the CLI's own session when one is known for the
//! conversation, sending only the newest user message. Everything else sends
//! the full transcript on stdin. The session id is recorded only after the
//! process exits successfully.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use modelgate_core::{FinishReason, StreamEvent, ToolCall, ToolResult, Usage};
use modelgate_tools::ToolRuntime;
use serde_json::Value;
use tokio::process::ChildStdout;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::process::{
    write_prompt, CliProcess, LineReader, SpawnConfig, StderrCollector, STDERR_GRACE,
};
use super::session::{conversation_key, SessionMap};
use crate::error::{GatewayError, GatewayResult};
use crate::fragments::ToolCallAccumulator;
use crate::gateway::{collect_events, response_from_events, stream_end, EventStream, Gateway, PartTracker};
use crate::jsonl::{parse_line, CliRecord};
use crate::types::{Message, ProviderConfig, Role, TextRequest, TextResponse};

const DEFAULT_PROGRAM: &str = "claude";
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Gateway backed by the Claude Code CLI.
#[derive(Clone)]
pub struct ClaudeCodeGateway {
    config: Arc<ProviderConfig>,
    sessions: SessionMap,
    runtime: ToolRuntime,
}

impl ClaudeCodeGateway {
    pub fn new(config: ProviderConfig) -> GatewayResult<Self> {
        if !config.kind.is_cli() {
            return Err(GatewayError::config(format!(
                "provider '{}' is not a CLI provider",
                config.name
            )));
        }
        Ok(Self {
            config: Arc::new(config),
            sessions: SessionMap::new(),
            runtime: ToolRuntime::default(),
        })
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    /// Resolve the session, build the prompt and spawn the process.
    async fn start(&self, request: TextRequest) -> GatewayResult<CliRun> {
        if !request.tools.is_empty() {
            return Err(GatewayError::validation(
                "the Claude Code CLI runs its own tools; caller-supplied tools are not supported",
            ));
        }
        let first_user = request
            .first_user_message()
            .ok_or_else(|| GatewayError::validation("conversation has no user message"))?;
        let key = conversation_key(request.instructions.as_deref(), &first_user.content);
        let model = request
            .model
            .clone()
            .or_else(|| self.config.resolved_default_model());

        let resume = if request.is_continuation() {
            self.sessions.get(&key).await
        } else {
            None
        };
        let prompt = match (&resume, request.last_user_message()) {
            (Some(_), Some(last)) => render_user(last),
            _ => transcript(&request),
        };

        let cli = &self.config.cli;
        let mut spawn = SpawnConfig::new(cli.program.clone().unwrap_or_else(|| DEFAULT_PROGRAM.to_string()))
            .with_program_args(cli.program_args.clone())
            .with_args(cli.extra_args.clone());
        if let Some(dir) = &cli.working_dir {
            spawn = spawn.with_working_dir(dir.clone());
        }
        if let Some(model) = &model {
            spawn = spawn.with_model(model.clone());
        }
        if let Some(session_id) = &resume {
            spawn = spawn.with_resume(session_id.clone());
        }
        if let Some(schema) = &request.schema {
            spawn = spawn.with_json_schema(schema.to_string());
        }

        tracing::info!(
            "Starting {} for '{}' ({})",
            spawn.program,
            self.config.name,
            match &resume {
                Some(id) => format!("resuming session {}", id),
                None => "new session".to_string(),
            }
        );

        let mut process = CliProcess::spawn(&spawn)?;
        let stdin = process
            .take_stdin()
            .ok_or_else(|| GatewayError::transport("failed to capture CLI stdin"))?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| GatewayError::transport("failed to capture CLI stdout"))?;
        let stderr = process
            .take_stderr()
            .ok_or_else(|| GatewayError::transport("failed to capture CLI stderr"))?;
        write_prompt(stdin, prompt);

        let deadline = request
            .timeout
            .or(cli.timeout)
            .or(self.config.timeout)
            .map(|t| Instant::now() + t);
        let idle = cli.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT);

        Ok(CliRun {
            process,
            reader: LineReader::new(stdout, Some(idle), deadline),
            stderr: StderrCollector::spawn(stderr),
            deadline,
            key,
            sessions: self.sessions.clone(),
            model: model.unwrap_or_default(),
            provider: self.config.name.clone(),
            summary: Arc::new(Mutex::new(RunSummary::default())),
        })
    }
}

#[async_trait]
impl Gateway for ClaudeCodeGateway {
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
        let run = self.start(request).await?;
        let summary = run.summary.clone();
        let events = collect_events(run.into_stream()).await?;

        let mut response = response_from_events(&events);
        let summary = summary.lock().await;
        if response.text.is_empty() {
            if let Some(text) = &summary.result_text {
                response.text = text.clone();
            }
        }
        response.structured = summary.structured_output.clone();
        response.session_id = summary.session_id.clone();
        Ok(response)
    }

    async fn stream_text(&self, request: TextRequest) -> GatewayResult<EventStream> {
        Ok(self.start(request).await?.into_stream())
    }
}

// ============================================================================
// One process run
// ============================================================================

/// What the final records reported, beyond the events themselves.
#[derive(Debug, Default)]
struct RunSummary {
    session_id: Option<String>,
    result_text: Option<String>,
    structured_output: Option<Value>,
}

struct CliRun {
    process: CliProcess,
    reader: LineReader<ChildStdout>,
    stderr: StderrCollector,
    deadline: Option<Instant>,
    key: String,
    sessions: SessionMap,
    model: String,
    provider: String,
    summary: Arc<Mutex<RunSummary>>,
}

impl CliRun {
    fn into_stream(self) -> EventStream {
        let CliRun {
            mut process,
            mut reader,
            stderr,
            deadline,
            key,
            sessions,
            model,
            provider,
            summary,
        } = self;

        let stream = try_stream! {
            yield StreamEvent::stream_start(model, provider.clone());
            let mut state = RecordState::default();

            let failure = loop {
                match reader.next_lines().await {
                    Ok(Some(lines)) => {
                        for line in lines {
                            if let Some(record) = parse_line(&line) {
                                for event in state.apply(record) {
                                    yield event;
                                }
                            }
                        }
                    }
                    Ok(None) => break None,
                    Err(failure) => break Some(failure),
                }
            };

            let exit = match failure {
                Some(_) => None,
                None => {
                    let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                    process.wait_with_limit(remaining).await?
                }
            };
            if exit.is_none() {
                process.kill().await;
            } else {
                // Children left behind may still hold stderr open.
                process.kill_group();
            }
            let stderr_text = stderr.finish(STDERR_GRACE).await;

            let outcome = match (failure, exit) {
                (Some(failure), _) => Err(GatewayError::ProcessFailure {
                    exit_code: None,
                    stderr: join_reason(&failure.describe(), &stderr_text),
                }),
                (None, Some(0)) => Ok(()),
                (None, Some(code)) => {
                    let message = if stderr_text.trim().is_empty() {
                        format!("exit code {}", code)
                    } else {
                        stderr_text.trim().to_string()
                    };
                    Err(GatewayError::ProcessFailure {
                        exit_code: Some(code),
                        stderr: message,
                    })
                }
                (None, None) => Err(GatewayError::ProcessFailure {
                    exit_code: None,
                    stderr: join_reason("timed out waiting for exit", &stderr_text),
                }),
            };
            if let Err(e) = &outcome {
                tracing::warn!("{} process failed: {}", provider, e);
            }
            outcome?;

            for event in state.finish() {
                yield event;
            }
            if let Some(session_id) = &state.session_id {
                sessions.insert(key.clone(), session_id.clone()).await;
                tracing::debug!("Recorded session {} for {}", session_id, provider);
            }
            {
                let mut summary = summary.lock().await;
                summary.session_id = state.session_id.clone();
                summary.result_text = state.result_text.clone();
                summary.structured_output = state.structured_output.clone();
            }
            yield stream_end(state.finish_reason.clone(), state.usage);
        };
        Box::pin(stream)
    }
}

fn join_reason(reason: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        reason.to_string()
    } else {
        format!("{}: {}", reason, stderr)
    }
}

// ============================================================================
// Record → event translation
// ============================================================================

/// Per-run translation state. Fragments and known calls are dropped with it.
#[derive(Default)]
struct RecordState {
    parts: PartTracker,
    fragments: ToolCallAccumulator,
    /// Calls already emitted, by id.
    calls: HashMap<String, ToolCall>,
    /// Whether text deltas streamed since the last complete assistant record.
    streamed_text: bool,
    session_id: Option<String>,
    usage: Usage,
    finish_reason: Option<FinishReason>,
    result_text: Option<String>,
    structured_output: Option<Value>,
}

impl RecordState {
    fn apply(&mut self, record: CliRecord) -> Vec<StreamEvent> {
        match record {
            CliRecord::SessionStarted { session_id, .. } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                Vec::new()
            }
            CliRecord::TextDelta(text) => {
                self.streamed_text = true;
                self.parts.text(text)
            }
            CliRecord::ReasoningDelta(text) => self.parts.reasoning(text),
            CliRecord::ToolUseStart { index, id, name } => {
                self.fragments.push(index, Some(id.as_str()), Some(name.as_str()), "");
                Vec::new()
            }
            CliRecord::ToolInputDelta {
                index,
                partial_json,
            } => {
                self.fragments.push(index, None, None, &partial_json);
                Vec::new()
            }
            CliRecord::BlockStop { .. } | CliRecord::MessageStop => self.flush_calls(),
            CliRecord::Assistant {
                text,
                tool_calls,
                session_id,
            } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                let mut out = self.flush_calls();
                if !self.streamed_text && !text.is_empty() {
                    out.extend(self.parts.text(text));
                }
                self.streamed_text = false;
                for call in tool_calls {
                    out.extend(self.emit_call(call));
                }
                out
            }
            CliRecord::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut out = self.flush_calls();
                let call = match self.calls.get(&tool_use_id) {
                    Some(call) => call.clone(),
                    None => {
                        let call = ToolCall::new(tool_use_id.clone(), "unknown", serde_json::json!({}));
                        out.extend(self.emit_call(call.clone()));
                        call
                    }
                };
                let error = is_error.then(|| match &content {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                out.push(StreamEvent::tool_result(
                    ToolResult::for_call(&call, content),
                    !is_error,
                    error,
                ));
                out
            }
            CliRecord::Result {
                session_id,
                text,
                is_error,
                stop_reason,
                usage,
                structured_output,
            } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                if let Some(usage) = usage {
                    self.usage = usage;
                }
                self.finish_reason = Some(if is_error {
                    FinishReason::Error
                } else {
                    stop_reason
                        .as_deref()
                        .map(FinishReason::from)
                        .unwrap_or(FinishReason::Stop)
                });
                self.result_text = text;
                self.structured_output = structured_output;
                self.flush_calls()
            }
            CliRecord::Error(message) => vec![StreamEvent::error("cli_error", message, true)],
        }
    }

    fn flush_calls(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for call in self.fragments.drain() {
            out.extend(self.emit_call(call));
        }
        out
    }

    fn emit_call(&mut self, call: ToolCall) -> Vec<StreamEvent> {
        if self.calls.contains_key(&call.id) {
            return Vec::new();
        }
        let mut out = self.parts.close();
        self.calls.insert(call.id.clone(), call.clone());
        out.push(StreamEvent::tool_call(call));
        out
    }

    /// Flush whatever is still open once the process has exited.
    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = self.flush_calls();
        out.extend(self.parts.close());
        out
    }
}

// ============================================================================
// Prompt rendering
// ============================================================================

fn render_user(message: &Message) -> String {
    if message.attachments.is_empty() {
        return message.content.clone();
    }
    let names: Vec<&str> = message.attachments.iter().map(|a| a.name.as_str()).collect();
    format!("{}\n\n[Attachments: {}]", message.content, names.join(", "))
}

/// Serialize instructions and history for a fresh CLI session.
fn transcript(request: &TextRequest) -> String {
    let mut out = String::new();
    if let Some(instructions) = request.instructions.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(instructions);
        out.push_str("\n\n");
    }
    if let [only] = request.messages.as_slice() {
        if only.role == Role::User {
            out.push_str(&render_user(only));
            return out;
        }
    }

    let turns: Vec<String> = request
        .messages
        .iter()
        .map(|m| match m.role {
            Role::User => format!("User: {}", render_user(m)),
            Role::Assistant => format!("Assistant: {}", m.content),
            Role::ToolResult => {
                let results: Vec<String> = m
                    .tool_results
                    .iter()
                    .map(|r| format!("{} → {}", r.name, r.content_text()))
                    .collect();
                format!("Tool results: {}", results.join("; "))
            }
        })
        .collect();
    out.push_str(&turns.join("\n\n"));
    out
}
