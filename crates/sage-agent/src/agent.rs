//! The loop driver: model step, router, tool dispatch, repeat.

use sage_ai::{Message, Model};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    dispatch,
    events::AgentEvent,
    handle::SessionHandle,
    model_step::{self, ModelClient, StepResult},
    registry::ToolRegistry,
    router::{Route, route},
    state::{ConversationState, NextAction},
};

/// Default cap on model steps per session
pub const DEFAULT_MAX_TURNS: u32 = 25;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use
    pub model: Model,
    /// Replaces the built-in system instruction
    pub system_instruction: Option<String>,
    /// Maximum model steps per session; `None` removes the guard
    pub max_turns: Option<u32>,
    /// Run the tool calls of one model message concurrently
    pub parallel_tools: bool,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl AgentConfig {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            system_instruction: None,
            max_turns: Some(DEFAULT_MAX_TURNS),
            parallel_tools: false,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model replied without tool calls
    Answered,
    /// The model call failed and the failure became the answer
    ModelFailed,
    /// The cycle guard stopped a model that kept requesting tools
    TurnLimit,
    /// The session handle was cancelled
    Cancelled,
}

/// Top-level state of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Terminated(Termination),
}

/// What a finished session hands back to the caller
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub state: ConversationState,
    pub termination: Termination,
    /// Number of model steps run
    pub turns: u32,
}

impl SessionOutcome {
    /// Text of the final model message
    pub fn answer(&self) -> String {
        self.state.final_answer().unwrap_or_default()
    }
}

/// Runs sessions against a shared registry and model client.
///
/// Sessions borrow the agent immutably, so several may run at once; each
/// owns its own `ConversationState` and event channel.
pub struct Agent {
    config: AgentConfig,
    registry: Arc<ToolRegistry>,
    client: Arc<dyn ModelClient>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        registry: Arc<ToolRegistry>,
        client: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            config,
            registry,
            client,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run a session from one user message to termination
    pub async fn run(&self, input: impl Into<String>) -> SessionOutcome {
        self.run_with_handle(ConversationState::new(input), &SessionHandle::new())
            .await
    }

    /// Run a session that can be cancelled through `handle`, publishing its
    /// events on the handle's channel.
    ///
    /// Never fails: model and tool failures end up as messages in the
    /// returned state.
    pub async fn run_with_handle(
        &self,
        mut state: ConversationState,
        handle: &SessionHandle,
    ) -> SessionOutcome {
        let input = state.messages().first().map(Message::text).unwrap_or_default();
        tracing::info!(model = %self.config.model.id, "session start");
        let _ = handle.events().send(AgentEvent::SessionStart { input });

        let mut turns = 0u32;
        let mut loop_state = LoopState::Running;

        while loop_state == LoopState::Running {
            if handle.is_cancelled() {
                state.append(Message::assistant(
                    "The session was cancelled before an answer was produced.",
                ));
                state.next_action = NextAction::End;
                loop_state = LoopState::Terminated(Termination::Cancelled);
                continue;
            }

            if let Some(max) = self.config.max_turns {
                if turns >= max {
                    // Reported through the termination, not as a step failure
                    let description = format!("turn limit reached after {} model steps", max);
                    tracing::warn!("{}", description);
                    state.append(Message::assistant_error(
                        format!(
                            "I stopped before reaching an answer: the {}-step limit was reached.",
                            max
                        ),
                        description,
                    ));
                    state.next_action = NextAction::End;
                    loop_state = LoopState::Terminated(Termination::TurnLimit);
                    continue;
                }
            }

            turns += 1;
            let _ = handle.events().send(AgentEvent::TurnStart { turn_number: turns });

            let step = model_step::run(
                &mut state,
                self.client.as_ref(),
                &self.registry,
                &self.config,
                handle.events(),
                handle.token(),
            )
            .await;

            loop_state = match step {
                StepResult::Failed => LoopState::Terminated(Termination::ModelFailed),
                // Picked up by the cancellation check on the next pass
                StepResult::Cancelled => LoopState::Running,
                StepResult::Responded => self.after_model_step(&mut state, handle).await,
            };
        }

        let termination = match loop_state {
            LoopState::Terminated(t) => t,
            LoopState::Running => Termination::Answered,
        };

        tracing::info!(
            ?termination,
            turns,
            tools_used = state.tools_used().len(),
            errors = state.error_count(),
            "session end"
        );
        let _ = handle.events().send(AgentEvent::SessionEnd {
            termination,
            total_turns: turns,
            total_usage: state.total_usage().clone(),
        });

        SessionOutcome {
            state,
            termination,
            turns,
        }
    }

    /// Route on the message just appended and dispatch if asked to
    async fn after_model_step(
        &self,
        state: &mut ConversationState,
        handle: &SessionHandle,
    ) -> LoopState {
        let decision = state.last_message().map(route).unwrap_or(Route::Terminate);
        tracing::debug!(?decision, "routed");

        match decision {
            Route::Terminate => {
                state.next_action = NextAction::End;
                LoopState::Terminated(Termination::Answered)
            }
            Route::Dispatch => {
                let names = state
                    .last_message()
                    .map(|m| m.tool_calls().iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default();
                state.next_action = NextAction::Tools { names };
                dispatch::run(
                    state,
                    &self.registry,
                    self.config.parallel_tools,
                    handle.events(),
                    handle.token(),
                )
                .await;
                LoopState::Running
            }
        }
    }
}
