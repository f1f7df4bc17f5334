//! Model step: turn the conversation into a request and append the reply.

use async_trait::async_trait;
use futures::StreamExt;
use sage_ai::{
    Context, Message, Model, StreamOptions,
    providers::{self, LlmProvider},
    stream::{MessageBuilder, MessageEvent, MessageEventStream},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    agent::AgentConfig,
    events::AgentEvent,
    prompt::SYSTEM_INSTRUCTION,
    registry::ToolRegistry,
    state::{ConversationState, NextAction},
};

/// Everything the model sees for one step
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: Model,
    /// Present only on the first step of a session
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<sage_ai::Tool>,
    pub options: StreamOptions,
}

/// The "generate next step" contract.
///
/// Returns the complete model message: terminal text, or text plus one or
/// more tool calls. Partial messages may be published on `events`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(
        &self,
        request: ModelRequest,
        events: &broadcast::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> sage_ai::Result<Message>;
}

/// Retry configuration for transient provider errors
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Drains a provider stream into one model message.
///
/// By default the provider is chosen per request from `request.model.api`.
#[derive(Clone, Default)]
pub struct ProviderClient {
    api_key: Option<String>,
    provider: Option<Arc<dyn LlmProvider>>,
    retry_config: RetryConfig,
}

impl ProviderClient {
    /// Keys are read from the provider's environment variable
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Always stream from `provider`, whatever the model's API
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Self::default()
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    async fn attempt(
        &self,
        request: &ModelRequest,
        events: &broadcast::Sender<AgentEvent>,
        cancel: &CancellationToken,
        streamed: &mut bool,
    ) -> sage_ai::Result<Message> {
        let provider: Arc<dyn LlmProvider> = match &self.provider {
            Some(provider) => Arc::clone(provider),
            None => Arc::from(providers::for_model(&request.model, self.api_key.as_deref())?),
        };
        let context = Context {
            system_prompt: request.system_prompt.clone(),
            messages: request.messages.clone(),
            tools: request.tools.clone(),
        };

        let mut stream: MessageEventStream = tokio::select! {
            _ = cancel.cancelled() => return Err(sage_ai::Error::Aborted),
            s = provider.stream(&request.model, &context, &request.options) => s?,
        };

        let mut builder = MessageBuilder::new();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(sage_ai::Error::Aborted),
                ev = stream.next() => ev,
            };
            let Some(event) = event else {
                return Err(sage_ai::Error::UnexpectedResponse(
                    "stream ended without a final message".into(),
                ));
            };

            builder.process_event(&event);
            match event {
                MessageEvent::TextDelta { .. }
                | MessageEvent::ToolCallStart { .. }
                | MessageEvent::ToolCallDelta { .. } => {
                    *streamed = true;
                    let _ = events.send(AgentEvent::MessageUpdate {
                        message: builder.current_message(),
                    });
                }
                MessageEvent::Done { message, .. } => return Ok(message),
                MessageEvent::Error { message } => {
                    return Err(sage_ai::Error::api("provider", message));
                }
                MessageEvent::Start { .. } => {}
            }
        }
    }
}

#[async_trait]
impl ModelClient for ProviderClient {
    async fn generate(
        &self,
        request: ModelRequest,
        events: &broadcast::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> sage_ai::Result<Message> {
        let mut attempt = 0u32;
        loop {
            let mut streamed = false;
            match self.attempt(&request, events, &cancel, &mut streamed).await {
                Ok(message) => return Ok(message),
                // Never replay once the caller has seen partial output
                Err(e) if !streamed && e.is_retryable() && attempt < self.retry_config.max_retries => {
                    let delay = self.retry_config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(sage_ai::Error::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// What a model step did to the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepResult {
    /// A model message was appended
    Responded,
    /// A synthetic failure message was appended and the failure recorded
    Failed,
    /// Cancelled before or during the call; nothing was appended
    Cancelled,
}

/// Format the state into a request.
///
/// The system instruction is attached only while the state says it has not
/// been injected yet, and is never written into the transcript.
pub(crate) fn build_request(
    state: &mut ConversationState,
    config: &AgentConfig,
    registry: &ToolRegistry,
) -> ModelRequest {
    let system_prompt = if state.system_instruction_injected() {
        None
    } else {
        state.mark_system_instruction_injected();
        Some(
            config
                .system_instruction
                .clone()
                .unwrap_or_else(|| SYSTEM_INSTRUCTION.to_string()),
        )
    };

    ModelRequest {
        model: config.model.clone(),
        system_prompt,
        messages: state.messages().to_vec(),
        tools: registry.api_tools(),
        options: StreamOptions {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        },
    }
}

/// Run one model step against `state`.
///
/// Model failures never escape: they become a synthetic model message, one
/// more on `error_count`, a new `last_error`, and a terminal `next_action`.
pub(crate) async fn run(
    state: &mut ConversationState,
    client: &dyn ModelClient,
    registry: &ToolRegistry,
    config: &AgentConfig,
    events: &broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> StepResult {
    let request = build_request(state, config, registry);
    tracing::debug!(
        messages = request.messages.len(),
        with_system_instruction = request.system_prompt.is_some(),
        "model step"
    );

    match client.generate(request, events, cancel.clone()).await {
        Ok(message) => {
            if let Some(usage) = message.usage() {
                state.add_usage(usage);
            }
            let _ = events.send(AgentEvent::MessageEnd {
                message: message.clone(),
            });
            state.append(message);
            StepResult::Responded
        }
        Err(_) if cancel.is_cancelled() => StepResult::Cancelled,
        Err(e) => {
            let description = e.to_string();
            tracing::warn!(error = %description, "model step failed");

            let message = Message::assistant_error(
                format!("I encountered an error: {}", description),
                description.clone(),
            );
            let _ = events.send(AgentEvent::Error {
                message: description.clone(),
            });
            let _ = events.send(AgentEvent::MessageEnd {
                message: message.clone(),
            });
            state.append(message);
            state.record_failure(description);
            state.next_action = NextAction::End;
            StepResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sage_ai::{Provider, StopReason, Usage};
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Replays one scripted event list per `stream` call.
    ///
    /// A script ending in `None` leaves the stream pending after its events.
    struct ScriptedProvider {
        scripts: parking_lot::Mutex<VecDeque<Vec<Option<MessageEvent>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Vec<Option<MessageEvent>>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: parking_lot::Mutex::new(scripts.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn stream(
            &self,
            _model: &Model,
            _context: &Context,
            _options: &StreamOptions,
        ) -> sage_ai::Result<MessageEventStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().pop_front().unwrap_or_default();
            let hang = matches!(script.last(), Some(None));
            let events: Vec<MessageEvent> = script.into_iter().flatten().collect();
            let events = futures::stream::iter(events);
            let stream: MessageEventStream = if hang {
                Box::pin(events.chain(futures::stream::pending()))
            } else {
                Box::pin(events)
            };
            Ok(stream)
        }
    }

    fn done(text: &str) -> Option<MessageEvent> {
        Some(MessageEvent::Done {
            message: Message::assistant(text),
            stop_reason: StopReason::Stop,
            usage: Usage::default(),
        })
    }

    fn delta(text: &str) -> Option<MessageEvent> {
        Some(MessageEvent::TextDelta {
            content_index: 0,
            delta: text.into(),
        })
    }

    fn failure(message: &str) -> Option<MessageEvent> {
        Some(MessageEvent::Error {
            message: message.into(),
        })
    }

    fn request() -> ModelRequest {
        let mut state = ConversationState::new("hi");
        build_request(&mut state, &config(), &ToolRegistry::empty())
    }

    fn fast_retries(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    async fn generate(client: &ProviderClient) -> sage_ai::Result<Message> {
        let (tx, _) = broadcast::channel(16);
        client.generate(request(), &tx, CancellationToken::new()).await
    }

    fn config() -> AgentConfig {
        AgentConfig::new(Model::custom(Provider::Ollama, "test"))
    }

    #[test]
    fn test_retry_defaults_to_none() {
        assert_eq!(RetryConfig::default().max_retries, 0);
    }

    #[test]
    fn test_retry_delay_backoff_is_capped() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_system_instruction_only_on_first_request() {
        let mut state = ConversationState::new("hi");
        let registry = ToolRegistry::empty();

        let first = build_request(&mut state, &config(), &registry);
        assert_eq!(first.system_prompt.as_deref(), Some(SYSTEM_INSTRUCTION));
        assert!(state.system_instruction_injected());

        let second = build_request(&mut state, &config(), &registry);
        assert_eq!(second.system_prompt, None);
        // The instruction never enters the transcript
        assert_eq!(second.messages.len(), 1);
    }

    #[test]
    fn test_system_instruction_override() {
        let mut state = ConversationState::new("hi");
        let mut config = config();
        config.system_instruction = Some("custom".into());
        let request = build_request(&mut state, &config, &ToolRegistry::empty());
        assert_eq!(request.system_prompt.as_deref(), Some("custom"));
    }

    #[test]
    fn test_request_carries_sampling_options() {
        let mut state = ConversationState::new("hi");
        let mut config = config();
        config.max_tokens = Some(512);
        config.temperature = Some(0.7);
        let request = build_request(&mut state, &config, &ToolRegistry::empty());
        assert_eq!(request.options.max_tokens, Some(512));
        assert_eq!(request.options.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn test_stream_is_drained_into_final_message() {
        let provider = ScriptedProvider::new(vec![vec![delta("Par"), delta("is"), done("Paris")]]);
        let client = ProviderClient::with_provider(provider.clone());
        let (tx, mut rx) = broadcast::channel(16);

        let message = client
            .generate(request(), &tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(message.text(), "Paris");
        assert_eq!(provider.calls(), 1);

        let mut partials = Vec::new();
        while let Ok(AgentEvent::MessageUpdate { message }) = rx.try_recv() {
            partials.push(message.text());
        }
        assert_eq!(partials, vec!["Par", "Paris"]);
    }

    #[tokio::test]
    async fn test_stream_ending_without_done_is_unexpected() {
        let client = ProviderClient::with_provider(ScriptedProvider::new(vec![vec![delta("half")]]));
        let err = generate(&client).await.unwrap_err();
        assert!(matches!(err, sage_ai::Error::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_error_event_becomes_api_error() {
        let client = ProviderClient::with_provider(ScriptedProvider::new(vec![vec![failure(
            "API key not valid",
        )]]));
        let err = generate(&client).await.unwrap_err();
        assert!(matches!(
            &err,
            sage_ai::Error::Api { message, .. } if message == "API key not valid"
        ));
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let provider = ScriptedProvider::new(vec![
            vec![failure("The model is overloaded")],
            vec![done("second try")],
        ]);
        let client = ProviderClient::with_provider(provider.clone());
        assert!(generate(&client).await.is_err());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried_with_backoff() {
        let provider = ScriptedProvider::new(vec![
            vec![failure("The model is overloaded")],
            vec![failure("Rate limit exceeded")],
            vec![done("third try")],
        ]);
        let client = ProviderClient::with_provider(provider.clone()).with_retry_config(fast_retries(3));
        let message = generate(&client).await.unwrap();
        assert_eq!(message.text(), "third try");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let provider = ScriptedProvider::new(vec![
            vec![failure("The model is overloaded")],
            vec![failure("The model is overloaded")],
            vec![done("never reached")],
        ]);
        let client = ProviderClient::with_provider(provider.clone()).with_retry_config(fast_retries(1));
        assert!(generate(&client).await.is_err());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let provider = ScriptedProvider::new(vec![
            vec![failure("bad schema")],
            vec![done("never reached")],
        ]);
        let client = ProviderClient::with_provider(provider.clone()).with_retry_config(fast_retries(3));
        assert!(generate(&client).await.is_err());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_replay_after_partial_output() {
        let provider = ScriptedProvider::new(vec![
            vec![delta("partial"), failure("The model is overloaded")],
            vec![done("replayed")],
        ]);
        let client = ProviderClient::with_provider(provider.clone()).with_retry_config(fast_retries(3));
        assert!(generate(&client).await.is_err());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_aborts() {
        let provider = ScriptedProvider::new(vec![vec![delta("thinking"), None]]);
        let client = ProviderClient::with_provider(provider);
        let (tx, _) = broadcast::channel(16);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };
        let err = client.generate(request(), &tx, cancel).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, sage_ai::Error::Aborted));
    }

    #[tokio::test]
    async fn test_stream_failure_becomes_synthetic_answer() {
        let client = ProviderClient::with_provider(ScriptedProvider::new(vec![vec![failure(
            "quota exhausted",
        )]]));
        let (tx, _) = broadcast::channel(16);
        let mut state = ConversationState::new("hi");

        let step = run(
            &mut state,
            &client,
            &ToolRegistry::empty(),
            &config(),
            &tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(step, StepResult::Failed);
        assert_eq!(state.error_count(), 1);
        assert!(state.last_error().unwrap().contains("quota exhausted"));
        assert_eq!(state.next_action, NextAction::End);
        assert!(state.final_answer().unwrap().starts_with("I encountered an error"));
    }
}
