//! OpenAI-compatible Chat Completions provider (OpenAI, Groq, OpenRouter, Ollama)

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::{LlmProvider, request_headers};
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{AssistantMetadata, Content, Context, Message, Model, StopReason, StreamOptions, Usage},
};

/// Chat Completions client
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAIProvider {
    /// `api_key` may be absent for local endpoints
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        let request = build_request(model, context, options);
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));

        let mut headers = request_headers(model);
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| Error::InvalidApiKey)?;
            headers.insert(AUTHORIZATION, value);
        }

        tracing::debug!(
            model = %model.id,
            provider = model.provider.name(),
            messages = request.messages.len(),
            "chat completions request"
        );

        let request_builder = self.client.post(&url).headers(headers).json(&request);
        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

fn build_request(model: &Model, context: &Context, options: &StreamOptions) -> ChatRequest {
    let mut messages = Vec::with_capacity(context.messages.len() + 1);
    if let Some(prompt) = &context.system_prompt {
        messages.push(ChatMessage::plain("system", prompt.clone()));
    }
    messages.extend(context.messages.iter().map(convert_message));

    let tools: Vec<ChatTool> = context
        .tools
        .iter()
        .map(|t| ChatTool {
            kind: "function",
            function: ChatFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect();

    ChatRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        stream_options: Some(ChatStreamOptions {
            include_usage: true,
        }),
        max_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
        temperature: options.temperature,
        tool_choice: (!tools.is_empty()).then_some("auto"),
        tools: (!tools.is_empty()).then_some(tools),
    }
}

fn joined_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(Content::as_text)
        .collect::<Vec<_>>()
        .join("")
}

fn convert_message(msg: &Message) -> ChatMessage {
    match msg {
        Message::User { content, .. } => ChatMessage::plain("user", joined_text(content)),
        Message::Assistant { content, .. } => {
            let text = joined_text(content);
            let tool_calls: Vec<ChatToolCall> = content
                .iter()
                .filter_map(Content::as_tool_call)
                .map(|call| ChatToolCall {
                    id: call.id.clone(),
                    kind: "function",
                    function: ChatFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect();
            ChatMessage {
                role: "assistant",
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Message::ToolResult {
            tool_call_id,
            content,
            ..
        } => ChatMessage {
            role: "tool",
            content: Some(joined_text(content)),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulated state of one streamed completion
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    calls: Vec<PendingCall>,
    finish_reason: Option<String>,
    usage: Usage,
}

impl StreamState {
    fn apply(&mut self, chunk: ChatChunk) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                self.text.push_str(&text);
                events.push(MessageEvent::TextDelta {
                    content_index: 0,
                    delta: text,
                });
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let idx = delta.index;
                while self.calls.len() <= idx {
                    self.calls.push(PendingCall::default());
                }
                // Text occupies slot 0 of the partial message
                let content_index = idx + 1;
                let call = &mut self.calls[idx];
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.name = name;
                        events.push(MessageEvent::ToolCallStart {
                            content_index,
                            id: call.id.clone(),
                            name: call.name.clone(),
                        });
                    }
                    if let Some(args) = function.arguments {
                        call.arguments.push_str(&args);
                        events.push(MessageEvent::ToolCallDelta {
                            content_index,
                            delta: args,
                        });
                    }
                }
            }

            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                input: usage.prompt_tokens,
                output: usage.completion_tokens,
            };
        }
        events
    }

    fn finish(self, model: &Model) -> MessageEvent {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(Content::text(self.text));
        }
        for call in self.calls.into_iter().filter(|c| !c.name.is_empty()) {
            let arguments = if call.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                // Malformed JSON is passed through so validation can report it
                serde_json::from_str(&call.arguments)
                    .unwrap_or(serde_json::Value::String(call.arguments))
            };
            content.push(Content::tool_call(call.id, call.name, arguments));
        }

        let has_tool_calls = content.iter().any(|c| c.as_tool_call().is_some());
        let stop_reason = match self.finish_reason.as_deref() {
            _ if has_tool_calls => StopReason::ToolUse,
            Some("length") => StopReason::Length,
            _ => StopReason::Stop,
        };

        MessageEvent::Done {
            message: Message::Assistant {
                content,
                metadata: AssistantMetadata {
                    provider: Some(model.provider),
                    model: Some(model.id.clone()),
                    usage: self.usage.clone(),
                    stop_reason: Some(stop_reason),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    ..Default::default()
                },
            },
            stop_reason,
            usage: self.usage,
        }
    }
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut state = StreamState::default();

        yield MessageEvent::Start {
            message: Message::Assistant {
                content: vec![],
                metadata: AssistantMetadata {
                    model: Some(model.id.clone()),
                    ..Default::default()
                },
            },
        };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }
                    match serde_json::from_str::<ChatChunk>(&msg.data) {
                        Ok(chunk) => {
                            for ev in state.apply(chunk) {
                                yield ev;
                            }
                        }
                        Err(e) => {
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    let message = serde_json::from_str::<ChatErrorResponse>(&body)
                        .map(|r| r.error.message)
                        .unwrap_or(body);
                    yield MessageEvent::Error {
                        message: format!("HTTP {}: {}", status, message),
                    };
                    return;
                }
                Err(e) => {
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        yield state.finish(&model);
    }
}

// Request types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<ChatStreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChatStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &'static str, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    delta: ChatDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<ChatFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: ChatError,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}
