//! Core types exchanged with the model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire protocol spoken by a model endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Api {
    GoogleGenerativeAI,
    OpenAICompletions,
}

/// Known LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    OpenAI,
    Groq,
    OpenRouter,
    Ollama,
    Custom,
}

impl Provider {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Google => "Google",
            Provider::OpenAI => "OpenAI",
            Provider::Groq => "Groq",
            Provider::OpenRouter => "OpenRouter",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom",
        }
    }

    /// Parse a provider id as used in config files and CLI flags
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "google" | "gemini" => Some(Provider::Google),
            "openai" => Some(Provider::OpenAI),
            "groq" => Some(Provider::Groq),
            "openrouter" => Some(Provider::OpenRouter),
            "ollama" => Some(Provider::Ollama),
            "custom" => Some(Provider::Custom),
            _ => None,
        }
    }

    /// Environment variable holding this provider's API key
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::Google => Some("GOOGLE_API_KEY"),
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
            Provider::Ollama | Provider::Custom => None,
        }
    }

    /// Wire protocol and default base URL for this provider
    pub fn endpoint(&self) -> (Api, &'static str) {
        match self {
            Provider::Google => (
                Api::GoogleGenerativeAI,
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            Provider::OpenAI => (Api::OpenAICompletions, "https://api.openai.com/v1"),
            Provider::Groq => (Api::OpenAICompletions, "https://api.groq.com/openai/v1"),
            Provider::OpenRouter => (Api::OpenAICompletions, "https://openrouter.ai/api/v1"),
            Provider::Ollama => (Api::OpenAICompletions, "http://localhost:11434/v1"),
            Provider::Custom => (Api::OpenAICompletions, ""),
        }
    }
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "gemini-2.0-flash")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// API type to use
    pub api: Api,
    /// Provider
    pub provider: Provider,
    /// Base URL for API calls
    pub base_url: String,
    /// Context window size in tokens
    pub context_window: u32,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    /// Build a model entry for an id that is not in the catalogue
    pub fn custom(provider: Provider, id: impl Into<String>) -> Self {
        let id = id.into();
        let (api, base_url) = provider.endpoint();
        Self {
            name: id.clone(),
            id,
            api,
            provider,
            base_url: base_url.to_string(),
            context_window: 128_000,
            max_tokens: 8192,
            headers: HashMap::new(),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
}

impl Usage {
    /// Add another turn's usage to this total
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Tool use requested
    ToolUse,
    /// Error occurred
    Error,
    /// Request was aborted
    Aborted,
}

/// A structured request from the model to invoke one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier used to correlate the tool-result entry
    pub id: String,
    /// Registered tool name
    pub name: String,
    /// Argument mapping
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Content blocks in messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Text content
    Text { text: String },
    /// Tool call request
    ToolCall(ToolCall),
}

impl Content {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool call
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall(ToolCall::new(id, name, arguments))
    }

    /// Get text if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the call if this is a tool call
    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// One entry of the conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// User message
    User {
        content: Vec<Content>,
        #[serde(default)]
        timestamp: i64,
    },
    /// Model response, possibly carrying tool calls
    Assistant {
        content: Vec<Content>,
        #[serde(flatten)]
        metadata: AssistantMetadata,
    },
    /// Tool result answering one tool call
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<Content>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        timestamp: i64,
    },
}

/// Metadata for assistant messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMetadata {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: vec![Content::text(text)],
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create an assistant message with plain text
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::assistant_with_content(vec![Content::text(text)])
    }

    /// Create an assistant message from content blocks
    pub fn assistant_with_content(content: Vec<Content>) -> Self {
        Self::Assistant {
            content,
            metadata: AssistantMetadata {
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        }
    }

    /// Create a synthetic assistant message reporting a failure
    pub fn assistant_error(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Assistant {
            content: vec![Content::text(text)],
            metadata: AssistantMetadata {
                stop_reason: Some(StopReason::Error),
                error_message: Some(error.into()),
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        }
    }

    /// Create a tool result message
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: vec![Content::text(text)],
            is_error,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "tool_result",
        }
    }

    /// Whether this is a user message
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    /// Get the content blocks
    pub fn content(&self) -> &[Content] {
        match self {
            Self::User { content, .. } => content,
            Self::Assistant { content, .. } => content,
            Self::ToolResult { content, .. } => content,
        }
    }

    /// Tool calls carried by an assistant message, in request order
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        match self {
            Self::Assistant { content, .. } => {
                content.iter().filter_map(Content::as_tool_call).collect()
            }
            _ => vec![],
        }
    }

    /// Usage reported for an assistant message
    pub fn usage(&self) -> Option<&Usage> {
        match self {
            Self::Assistant { metadata, .. } => Some(&metadata.usage),
            _ => None,
        }
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.content()
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Everything a provider needs for one request
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// System instruction, if any
    pub system_prompt: Option<String>,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Available tools
    pub tools: Vec<Tool>,
}

/// Sampling options for a request
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
}
