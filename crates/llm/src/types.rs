//! Gateway Request and Response Types

use std::path::PathBuf;
use std::time::Duration;

use modelgate_core::{FinishReason, ToolCall, ToolRegistry, ToolResult, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Provider Configuration
// ============================================================================

/// Backend family a provider belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai_compatible")]
    OpenAICompatible,
    #[serde(rename = "claude_code")]
    ClaudeCode,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAICompatible => "openai_compatible",
            ProviderKind::ClaudeCode => "claude_code",
        }
    }

    /// Whether this kind is served by a local subprocess rather than HTTP.
    pub fn is_cli(&self) -> bool {
        matches!(self, ProviderKind::ClaudeCode)
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAI => Some("https://api.openai.com/v1"),
            ProviderKind::DeepSeek => Some("https://api.deepseek.com/v1"),
            ProviderKind::Ollama => Some("http://localhost:11434/v1"),
            ProviderKind::OpenAICompatible | ProviderKind::ClaudeCode => None,
        }
    }

    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAI => Some("gpt-4o-mini"),
            ProviderKind::DeepSeek => Some("deepseek-chat"),
            ProviderKind::Ollama => Some("llama3.1"),
            ProviderKind::ClaudeCode => Some("sonnet"),
            ProviderKind::OpenAICompatible => None,
        }
    }

    /// Whether API calls need a bearer token.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderKind::OpenAI | ProviderKind::DeepSeek)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for subprocess-backed providers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliSettings {
    /// Executable to spawn. Defaults to `claude`.
    pub program: Option<String>,
    /// Arguments placed before the CLI's own flags, for wrapper programs.
    pub program_args: Vec<String>,
    pub extra_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Fail when the process prints nothing for this long.
    pub idle_timeout: Option<Duration>,
    /// Overall wall-clock limit for one call.
    pub timeout: Option<Duration>,
}

/// Resolved configuration for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Transport timeout applied when the request carries none.
    pub timeout: Option<Duration>,
    /// Proxy URL (`http://`, `https://` or `socks5://`).
    pub proxy: Option<String>,
    pub cli: CliSettings,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            api_key: None,
            base_url: None,
            default_model: None,
            max_tokens: None,
            temperature: None,
            timeout: None,
            proxy: None,
            cli: CliSettings::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_cli(mut self, cli: CliSettings) -> Self {
        self.cli = cli;
        self
    }

    /// Configured default model, falling back to the kind's default.
    pub fn resolved_default_model(&self) -> Option<String> {
        self.default_model
            .clone()
            .or_else(|| self.kind.default_model().map(|m| m.to_string()))
    }

    pub fn resolved_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| self.kind.default_base_url().map(|u| u.to_string()))
            .map(|u| u.trim_end_matches('/').to_string())
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

/// File attached to a user message. Either `url` or base64 `data` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<String>,
}

impl Attachment {
    pub fn from_url(
        name: impl Into<String>,
        media_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            url: Some(url.into()),
            data: None,
        }
    }

    pub fn from_base64(
        name: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            url: None,
            data: Some(data.into()),
        }
    }

    /// URL form used by OpenAI-style `image_url` parts.
    pub fn as_url(&self) -> String {
        match (&self.url, &self.data) {
            (Some(url), _) => url.clone(),
            (None, Some(data)) => format!("data:{};base64,{}", self.media_type, data),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Results carried by a tool-result message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = calls;
        msg
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        let mut msg = Self::with_role(Role::ToolResult, String::new());
        msg.tool_results = results;
        msg
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

// ============================================================================
// Requests and Responses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Model round trips allowed when tools are called. 1 means tool
    /// results are returned to the caller rather than sent back to the model.
    pub max_steps: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            max_steps: 1,
        }
    }
}

/// One call to a gateway.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub invocation_id: String,
    pub agent_identity: String,
    /// `None` selects the provider's default model.
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub messages: Vec<Message>,
    pub tools: ToolRegistry,
    /// JSON schema the final answer must follow.
    pub schema: Option<Value>,
    pub options: GenerateOptions,
    pub timeout: Option<Duration>,
}

impl TextRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            agent_identity: "modelgate".to_string(),
            model: None,
            instructions: None,
            messages,
            tools: ToolRegistry::new(),
            schema: None,
            options: GenerateOptions::default(),
            timeout: None,
        }
    }

    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = invocation_id.into();
        self
    }

    pub fn with_agent_identity(mut self, agent_identity: impl Into<String>) -> Self {
        self.agent_identity = agent_identity.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.options.max_steps = max_steps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether an earlier exchange already happened in this conversation.
    pub fn is_continuation(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::Assistant)
    }

    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

/// Final, accumulated result of a call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextResponse {
    pub text: String,
    /// Parsed output when a schema was requested and the backend honored it.
    pub structured: Option<Value>,
    pub usage: Usage,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub finish_reason: Option<FinishReason>,
    pub model: String,
    pub provider: String,
    /// Backend session id, for subprocess providers that report one.
    pub session_id: Option<String>,
}
