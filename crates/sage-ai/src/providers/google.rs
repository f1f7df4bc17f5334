//! Google Generative AI (Gemini) provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::{LlmProvider, request_headers};
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{
        AssistantMetadata, Content, Context, Message, Model, Provider, StopReason, StreamOptions,
        Usage,
    },
};

/// Gemini client
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Create from `GOOGLE_API_KEY` or `GEMINI_API_KEY`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(api_key))
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        let request = build_request(model, context, options);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            model.base_url, model.id, self.api_key
        );

        tracing::debug!(
            model = %model.id,
            messages = context.messages.len(),
            tools = context.tools.len(),
            "gemini request"
        );

        let request_builder = self
            .client
            .post(&url)
            .headers(request_headers(model))
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

fn build_request(model: &Model, context: &Context, options: &StreamOptions) -> GeminiRequest {
    let contents = convert_messages(&context.messages);

    let system_instruction = context.system_prompt.as_ref().map(|prompt| GeminiContent {
        role: None,
        parts: vec![GeminiPart::Text {
            text: prompt.clone(),
        }],
    });

    let tools = if context.tools.is_empty() {
        None
    } else {
        Some(vec![GeminiTool {
            function_declarations: context
                .tools
                .iter()
                .map(|t| GeminiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    // Gemini rejects object schemas without properties
                    parameters: has_properties(&t.parameters).then(|| t.parameters.clone()),
                })
                .collect(),
        }])
    };

    GeminiRequest {
        contents,
        system_instruction,
        tools,
        generation_config: Some(GeminiGenerationConfig {
            max_output_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
            temperature: options.temperature,
        }),
    }
}

fn has_properties(schema: &serde_json::Value) -> bool {
    schema
        .get("properties")
        .and_then(serde_json::Value::as_object)
        .is_some_and(|p| !p.is_empty())
}

/// Convert the transcript, folding the results of one model turn into a
/// single content: Gemini wants one functionResponse per functionCall there.
fn convert_messages(messages: &[Message]) -> Vec<GeminiContent> {
    let mut contents: Vec<GeminiContent> = Vec::with_capacity(messages.len());
    let mut last_was_result = false;
    for msg in messages {
        let Some(content) = convert_message(msg) else {
            continue;
        };
        let is_result = matches!(msg, Message::ToolResult { .. });
        match contents.last_mut() {
            Some(previous) if is_result && last_was_result => previous.parts.extend(content.parts),
            _ => contents.push(content),
        }
        last_was_result = is_result;
    }
    contents
}

fn convert_message(msg: &Message) -> Option<GeminiContent> {
    let (role, parts) = match msg {
        Message::User { content, .. } => (
            "user",
            content
                .iter()
                .filter_map(|c| c.as_text())
                .map(|text| GeminiPart::Text {
                    text: text.to_string(),
                })
                .collect::<Vec<_>>(),
        ),
        Message::Assistant { content, .. } => (
            "model",
            content
                .iter()
                .map(|c| match c {
                    Content::Text { text } => GeminiPart::Text { text: text.clone() },
                    // Gemini correlates responses by name and position, not id
                    Content::ToolCall(call) => GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                        },
                    },
                })
                .collect(),
        ),
        Message::ToolResult {
            tool_name, content, ..
        } => {
            let text = content
                .iter()
                .filter_map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("");
            (
                "user",
                vec![GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: tool_name.clone(),
                        response: serde_json::json!({ "result": text }),
                    },
                }],
            )
        }
    };

    if parts.is_empty() {
        None
    } else {
        Some(GeminiContent {
            role: Some(role.to_string()),
            parts,
        })
    }
}

/// Accumulated state of one streamed Gemini response
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    tool_calls: Vec<(String, String, serde_json::Value)>,
    finish_reason: Option<String>,
    usage: Usage,
}

impl StreamState {
    /// Fold a chunk in, returning the events it produces
    fn apply(&mut self, chunk: GeminiStreamResponse) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        for candidate in chunk.candidates {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(text) = part.text {
                    self.text.push_str(&text);
                    events.push(MessageEvent::TextDelta {
                        content_index: 0,
                        delta: text,
                    });
                }
                if let Some(call) = part.function_call {
                    let index = self.tool_calls.len() + 1;
                    let id = format!("call_{}", uuid::Uuid::new_v4().simple());
                    events.push(MessageEvent::ToolCallStart {
                        content_index: index,
                        id: id.clone(),
                        name: call.name.clone(),
                    });
                    events.push(MessageEvent::ToolCallDelta {
                        content_index: index,
                        delta: call.args.to_string(),
                    });
                    self.tool_calls.push((id, call.name, call.args));
                }
            }
            if candidate.finish_reason.is_some() {
                self.finish_reason = candidate.finish_reason;
            }
        }
        if let Some(usage) = chunk.usage_metadata {
            self.usage = Usage {
                input: usage.prompt_token_count.unwrap_or(0),
                output: usage.candidates_token_count.unwrap_or(0),
            };
        }
        events
    }

    fn finish(self, model: &Model) -> MessageEvent {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(Content::text(self.text));
        }
        let has_tool_calls = !self.tool_calls.is_empty();
        for (id, name, args) in self.tool_calls {
            content.push(Content::tool_call(id, name, args));
        }

        let stop_reason = match self.finish_reason.as_deref() {
            _ if has_tool_calls => StopReason::ToolUse,
            Some("MAX_TOKENS") => StopReason::Length,
            _ => StopReason::Stop,
        };

        MessageEvent::Done {
            message: Message::Assistant {
                content,
                metadata: AssistantMetadata {
                    provider: Some(Provider::Google),
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
                    if msg.data.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<GeminiStreamResponse>(&msg.data) {
                        Ok(chunk) => {
                            for ev in state.apply(chunk) {
                                yield ev;
                            }
                        }
                        Err(e) => {
                            let message = serde_json::from_str::<GeminiErrorResponse>(&msg.data)
                                .map(|r| r.error.message)
                                .unwrap_or_else(|_| format!("Failed to parse chunk: {}", e));
                            yield MessageEvent::Error { message };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    let message = serde_json::from_str::<GeminiErrorResponse>(&body)
                        .map(|r| format!("{} ({})", r.error.message, r.error.status.unwrap_or_default()))
                        .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));
                    yield MessageEvent::Error { message };
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
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponsePart {
    text: Option<String>,
    function_call: Option<GeminiResponseFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tool;
    use serde_json::json;

    fn gemini() -> Model {
        crate::models::get_model_by_id("gemini-2.0-flash").unwrap()
    }

    #[test]
    fn test_request_carries_system_instruction_and_tools() {
        let context = Context {
            system_prompt: Some("be helpful".into()),
            messages: vec![Message::user("hi")],
            tools: vec![
                Tool::new(
                    "reverse_text",
                    "Reverse",
                    json!({"type": "object", "properties": {"text": {"type": "string"}}}),
                ),
                Tool::new("list_available_databases", "List", json!({"type": "object"})),
            ],
        };
        let request = build_request(&gemini(), &context, &StreamOptions::default());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be helpful");
        let declarations = &value["tools"][0]["functionDeclarations"];
        assert_eq!(declarations[0]["name"], "reverse_text");
        assert_eq!(declarations[0]["parameters"]["properties"]["text"]["type"], "string");
        assert!(declarations[1].get("parameters").is_none());
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_request_without_system_instruction() {
        let context = Context {
            system_prompt: None,
            messages: vec![Message::user("hi")],
            tools: vec![],
        };
        let value = serde_json::to_value(build_request(
            &gemini(),
            &context,
            &StreamOptions::default(),
        ))
        .unwrap();
        assert!(value.get("systemInstruction").is_none());
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_tool_round_trip_conversion() {
        let call = Message::assistant_with_content(vec![Content::tool_call(
            "call_1",
            "reverse_text",
            json!({"text": "abc"}),
        )]);
        let result = Message::tool_result("call_1", "reverse_text", "Reversed: cba", false);

        let call_value = serde_json::to_value(convert_message(&call).unwrap()).unwrap();
        assert_eq!(call_value["role"], "model");
        assert_eq!(call_value["parts"][0]["functionCall"]["args"]["text"], "abc");

        let result_value = serde_json::to_value(convert_message(&result).unwrap()).unwrap();
        assert_eq!(
            result_value["parts"][0]["functionResponse"]["response"]["result"],
            "Reversed: cba"
        );
    }

    #[test]
    fn test_results_of_one_turn_share_a_content() {
        let context = Context {
            system_prompt: None,
            messages: vec![
                Message::user("reverse abc and count words in 'a b'"),
                Message::assistant_with_content(vec![
                    Content::tool_call("call_1", "reverse_text", json!({"text": "abc"})),
                    Content::tool_call("call_2", "count_words", json!({"text": "a b"})),
                ]),
                Message::tool_result("call_1", "reverse_text", "Reversed: cba", false),
                Message::tool_result("call_2", "count_words", "Word count: 2", false),
                Message::assistant("cba, 2 words"),
                Message::tool_result("call_3", "reverse_text", "late", false),
            ],
            tools: vec![],
        };
        let value = serde_json::to_value(build_request(
            &gemini(),
            &context,
            &StreamOptions::default(),
        ))
        .unwrap();

        let contents = value["contents"].as_array().unwrap();
        let roles: Vec<&str> = contents.iter().map(|c| c["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["user", "model", "user", "model", "user"]);

        let responses = contents[2]["parts"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["functionResponse"]["name"], "reverse_text");
        assert_eq!(responses[1]["functionResponse"]["name"], "count_words");
        assert_eq!(contents[4]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_stream_state_text_and_calls() {
        let mut state = StreamState::default();
        let chunk: GeminiStreamResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Checking. "},
                    {"functionCall": {"name": "reverse_text", "args": {"text": "abc"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4}
        }))
        .unwrap();

        let events = state.apply(chunk);
        assert_eq!(events.len(), 3);

        match state.finish(&gemini()) {
            MessageEvent::Done {
                message,
                stop_reason,
                usage,
            } => {
                assert_eq!(stop_reason, StopReason::ToolUse);
                assert_eq!(usage, Usage { input: 12, output: 4 });
                assert_eq!(message.text(), "Checking. ");
                let calls = message.tool_calls();
                assert_eq!(calls.len(), 1);
                assert!(calls[0].id.starts_with("call_"));
                assert_eq!(calls[0].arguments, json!({"text": "abc"}));
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_state_ignores_unknown_parts() {
        let mut state = StreamState::default();
        let chunk: GeminiStreamResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"thoughtSignature": "xyz"}]}}]
        }))
        .unwrap();
        assert!(state.apply(chunk).is_empty());
    }

    #[test]
    fn test_tool_call_ids_are_unique() {
        let mut state = StreamState::default();
        let chunk: GeminiStreamResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "a", "args": {}}},
                {"functionCall": {"name": "a", "args": {}}}
            ]}}]
        }))
        .unwrap();
        state.apply(chunk);
        assert_ne!(state.tool_calls[0].0, state.tool_calls[1].0);
    }
}
