//! Tool dispatch step: run every tool call on the latest model message.

use futures::future::join_all;
use sage_ai::{Message, ToolCall};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    events::AgentEvent,
    registry::ToolRegistry,
    state::ConversationState,
    tool::ToolError,
};

/// How a single tool call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The tool returned text
    Completed,
    /// The tool ran and reported a failure
    ToolFailed { message: String },
    /// Arguments did not match the declared schema
    InvalidArguments { message: String },
    /// The model named a tool that is not registered
    UnknownTool,
    /// The session was cancelled before or while the tool ran
    Cancelled,
}

impl DispatchOutcome {
    pub fn is_error(&self) -> bool {
        !matches!(self, DispatchOutcome::Completed)
    }
}

/// Result of one call, in the shape appended to the transcript
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Text sent back to the model
    pub text: String,
    pub outcome: DispatchOutcome,
}

impl DispatchRecord {
    fn new(call: &ToolCall, text: String, outcome: DispatchOutcome) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            text,
            outcome,
        }
    }

    /// Whether the name resolved in the registry
    pub fn resolved(&self) -> bool {
        self.outcome != DispatchOutcome::UnknownTool
    }

    pub fn to_message(&self) -> Message {
        Message::tool_result(
            &self.tool_call_id,
            &self.tool_name,
            &self.text,
            self.outcome.is_error(),
        )
    }
}

/// Execute one call. Never fails: every problem becomes error text.
pub async fn dispatch_call(
    call: &ToolCall,
    registry: &ToolRegistry,
    events: &broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> DispatchRecord {
    let _ = events.send(AgentEvent::ToolExecutionStart {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        arguments: call.arguments.clone(),
    });

    let record = if cancel.is_cancelled() {
        cancelled(call)
    } else {
        match registry.lookup(&call.name) {
            Err(_) => {
                tracing::warn!(tool = %call.name, "model requested an unknown tool");
                DispatchRecord::new(
                    call,
                    format!(
                        "Error: {} is not a valid tool, try one of [{}].",
                        call.name,
                        registry.names().join(", ")
                    ),
                    DispatchOutcome::UnknownTool,
                )
            }
            Ok(tool) => match registry.validate(&call.name, &call.arguments) {
                Ok(Some(message)) => DispatchRecord::new(
                    call,
                    format!("Error: {}", message),
                    DispatchOutcome::InvalidArguments { message },
                ),
                _ => {
                    tracing::info!(tool = %call.name, id = %call.id, "dispatching tool");
                    match tool.execute(call.arguments.clone(), cancel.clone()).await {
                        Ok(text) => DispatchRecord::new(call, text, DispatchOutcome::Completed),
                        Err(ToolError::Cancelled) => cancelled(call),
                        Err(ToolError::InvalidArguments(message)) => DispatchRecord::new(
                            call,
                            format!("Error: invalid arguments: {}", message),
                            DispatchOutcome::InvalidArguments { message },
                        ),
                        Err(ToolError::Execution(message)) => {
                            tracing::warn!(tool = %call.name, error = %message, "tool failed");
                            DispatchRecord::new(
                                call,
                                format!("Error: {}", message),
                                DispatchOutcome::ToolFailed { message },
                            )
                        }
                    }
                }
            },
        }
    };

    let _ = events.send(AgentEvent::ToolExecutionEnd {
        tool_call_id: record.tool_call_id.clone(),
        tool_name: record.tool_name.clone(),
        result: record.text.clone(),
        is_error: record.outcome.is_error(),
    });
    record
}

fn cancelled(call: &ToolCall) -> DispatchRecord {
    DispatchRecord::new(
        call,
        "Error: tool call cancelled".to_string(),
        DispatchOutcome::Cancelled,
    )
}

/// Run every call and return records in request order.
///
/// With `parallel` the calls run concurrently; the order of the returned
/// records is still the order the model asked for them.
pub async fn dispatch_all(
    calls: &[ToolCall],
    registry: &ToolRegistry,
    parallel: bool,
    events: &broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> Vec<DispatchRecord> {
    if parallel {
        join_all(
            calls
                .iter()
                .map(|call| dispatch_call(call, registry, events, cancel.clone())),
        )
        .await
    } else {
        let mut records = Vec::with_capacity(calls.len());
        for call in calls {
            records.push(dispatch_call(call, registry, events, cancel.clone()).await);
        }
        records
    }
}

/// Run the dispatch step for the latest model message and fold the results
/// into `state`: one tool-result entry per call, in request order.
pub(crate) async fn run(
    state: &mut ConversationState,
    registry: &ToolRegistry,
    parallel: bool,
    events: &broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> Vec<DispatchOutcome> {
    let calls: Vec<ToolCall> = state
        .last_message()
        .map(|m| m.tool_calls().into_iter().cloned().collect())
        .unwrap_or_default();

    let records = dispatch_all(&calls, registry, parallel, events, cancel).await;

    records
        .into_iter()
        .map(|record| {
            if record.resolved() {
                state.record_tool_use(record.tool_name.as_str());
            }
            if record.outcome == DispatchOutcome::Completed {
                state.intermediate_results.insert(
                    record.tool_call_id.clone(),
                    serde_json::Value::String(record.text.clone()),
                );
            }
            state.append(record.to_message());
            record.outcome
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{BoxedTool, Tool, ToolOutput, str_arg};
    use async_trait::async_trait;
    use sage_ai::Content;
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
            Ok(str_arg(&arguments, "text")?.to_uppercase())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value, _cancel: CancellationToken) -> ToolOutput {
            Err(ToolError::execution("disk on fire"))
        }
    }

    /// Sleeps for the requested number of milliseconds, then echoes its tag
    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "ms": { "type": "integer" }, "tag": { "type": "string" } }
            })
        }
        async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
            let ms = arguments["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(str_arg(&arguments, "tag")?.to_string())
        }
    }

    fn registry() -> ToolRegistry {
        let tools: Vec<BoxedTool> = vec![Arc::new(Upper), Arc::new(Failing), Arc::new(Slow)];
        ToolRegistry::register(tools).unwrap()
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args)
    }

    fn events() -> broadcast::Sender<AgentEvent> {
        broadcast::channel(64).0
    }

    #[tokio::test]
    async fn test_completed_call() {
        let record = dispatch_call(
            &call("c1", "upper", json!({"text": "abc"})),
            &registry(),
            &events(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(record.outcome, DispatchOutcome::Completed);
        assert_eq!(record.text, "ABC");
        assert!(!record.to_message().content().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_text() {
        let record = dispatch_call(
            &call("c1", "does_not_exist", json!({})),
            &registry(),
            &events(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(record.outcome, DispatchOutcome::UnknownTool);
        assert!(record.text.starts_with("Error: does_not_exist is not a valid tool"));
        assert!(record.text.contains("upper"));
        assert!(!record.resolved());
    }

    #[tokio::test]
    async fn test_invalid_arguments_do_not_reach_tool() {
        let record = dispatch_call(
            &call("c1", "upper", json!({"text": 42})),
            &registry(),
            &events(),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(record.outcome, DispatchOutcome::InvalidArguments { .. }));
        assert!(record.text.contains("Tool argument validation failed"));
        assert!(record.resolved());
    }

    #[tokio::test]
    async fn test_tool_failure_is_text() {
        let record = dispatch_call(
            &call("c1", "failing", json!({})),
            &registry(),
            &events(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(
            record.outcome,
            DispatchOutcome::ToolFailed {
                message: "disk on fire".into()
            }
        );
        assert_eq!(record.text, "Error: disk on fire");
        match record.to_message() {
            Message::ToolResult {
                tool_call_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_call_id, "c1");
                assert!(is_error);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_invocation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let record = dispatch_call(
            &call("c1", "upper", json!({"text": "abc"})),
            &registry(),
            &events(),
            cancel,
        )
        .await;
        assert_eq!(record.outcome, DispatchOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_parallel_dispatch_keeps_request_order() {
        let calls = vec![
            call("a", "slow", json!({"ms": 60, "tag": "A"})),
            call("b", "slow", json!({"ms": 5, "tag": "B"})),
            call("c", "slow", json!({"ms": 30, "tag": "C"})),
        ];
        let records =
            dispatch_all(&calls, &registry(), true, &events(), CancellationToken::new()).await;
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_events_bracket_each_call() {
        let tx = events();
        let mut rx = tx.subscribe();
        dispatch_call(
            &call("c1", "upper", json!({"text": "x"})),
            &registry(),
            &tx,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::ToolExecutionStart { tool_name, .. } if tool_name == "upper"
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::ToolExecutionEnd { result, is_error: false, .. } if result == "X"
        ));
    }

    #[tokio::test]
    async fn test_run_folds_records_into_state() {
        let mut state = ConversationState::new("go");
        state.append(Message::assistant_with_content(vec![
            Content::tool_call("c1", "upper", json!({"text": "hi"})),
            Content::tool_call("c2", "nope", json!({})),
            Content::tool_call("c3", "failing", json!({})),
        ]));

        let outcomes = run(
            &mut state,
            &registry(),
            false,
            &events(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(state.messages().len(), 5);
        assert_eq!(state.tools_used(), &["upper".to_string(), "failing".to_string()]);
        assert_eq!(state.error_count(), 0);
        assert_eq!(state.intermediate_results.get("c1"), Some(&json!("HI")));
        assert!(!state.intermediate_results.contains_key("c3"));
    }
}
