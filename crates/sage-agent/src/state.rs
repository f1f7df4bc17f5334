//! Conversation state threaded through one session's loop.

use sage_ai::{Message, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Most recent routing decision.
///
/// Advisory only: the router always recomputes from the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextAction {
    /// No decision has been made yet
    #[default]
    Undecided,
    /// Dispatch the named tools
    Tools { names: Vec<String> },
    /// The loop is finished
    End,
}

/// The mutable record of one session.
///
/// The transcript is append-only: entries can be added through the loop
/// but never edited or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// Latest routing decision
    pub next_action: NextAction,
    /// Values stashed across cycles outside the transcript
    pub intermediate_results: HashMap<String, Value>,
    tools_used: Vec<String>,
    error_count: u32,
    last_error: Option<String>,
    system_instruction_injected: bool,
    total_usage: Usage,
}

impl ConversationState {
    /// Fresh state holding exactly one user message
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(user_input)],
            next_action: NextAction::default(),
            intermediate_results: HashMap::new(),
            tools_used: Vec::new(),
            error_count: 0,
            last_error: None,
            system_instruction_injected: false,
            total_usage: Usage::default(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn tools_used(&self) -> &[String] {
        &self.tools_used
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Description of the most recent failure this session
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn system_instruction_injected(&self) -> bool {
        self.system_instruction_injected
    }

    /// Provider-reported token usage summed over every model step
    pub fn total_usage(&self) -> &Usage {
        &self.total_usage
    }

    /// Text of the final model message, if the transcript ends with one
    pub fn final_answer(&self) -> Option<String> {
        match self.messages.last() {
            Some(msg @ Message::Assistant { .. }) => Some(msg.text()),
            _ => None,
        }
    }

    pub(crate) fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn record_tool_use(&mut self, name: impl Into<String>) {
        self.tools_used.push(name.into());
    }

    /// Count one failure and remember its description
    pub(crate) fn record_failure(&mut self, description: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(description.into());
    }

    pub(crate) fn mark_system_instruction_injected(&mut self) {
        self.system_instruction_injected = true;
    }

    pub(crate) fn add_usage(&mut self, usage: &Usage) {
        self.total_usage.add(usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state() {
        let state = ConversationState::new("What is 2 ** 10?");
        assert_eq!(state.messages().len(), 1);
        assert!(state.messages()[0].is_user());
        assert_eq!(state.next_action, NextAction::Undecided);
        assert!(state.intermediate_results.is_empty());
        assert!(state.tools_used().is_empty());
        assert_eq!(state.error_count(), 0);
        assert_eq!(state.last_error(), None);
        assert!(!state.system_instruction_injected());
        assert_eq!(state.final_answer(), None);
    }

    #[test]
    fn test_failures_accumulate_and_last_error_sticks() {
        let mut state = ConversationState::new("hi");
        state.record_failure("first");
        state.append(Message::assistant("recovered"));
        assert_eq!(state.last_error(), Some("first"));

        state.record_failure("second");
        assert_eq!(state.error_count(), 2);
        assert_eq!(state.last_error(), Some("second"));
    }

    #[test]
    fn test_final_answer_reads_last_assistant_message() {
        let mut state = ConversationState::new("hi");
        state.append(Message::assistant("hello"));
        assert_eq!(state.final_answer().as_deref(), Some("hello"));

        state.append(Message::tool_result("c1", "t", "out", false));
        assert_eq!(state.final_answer(), None);
    }

    #[test]
    fn test_usage_sums() {
        let mut state = ConversationState::new("hi");
        state.add_usage(&Usage { input: 10, output: 2 });
        state.add_usage(&Usage { input: 5, output: 1 });
        assert_eq!(state.total_usage(), &Usage { input: 15, output: 3 });
    }

    #[test]
    fn test_next_action_serializes_tagged() {
        let action = NextAction::Tools {
            names: vec!["reverse_text".into()],
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["kind"], "tools");
        assert_eq!(value["names"][0], "reverse_text");
    }
}
