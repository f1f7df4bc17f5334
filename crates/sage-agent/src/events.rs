//! Agent event types

use sage_ai::{Message, Usage};
use serde::{Deserialize, Serialize};

use crate::agent::Termination;

/// Events emitted while a session runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A session started from one user message
    SessionStart { input: String },

    /// A model step is about to run
    TurnStart { turn_number: u32 },

    /// Partial model message while the provider streams
    MessageUpdate { message: Message },

    /// A model message was appended to the transcript
    MessageEnd { message: Message },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// The loop terminated
    SessionEnd {
        termination: Termination,
        total_turns: u32,
        total_usage: Usage,
    },

    /// A failure was recovered into the transcript
    Error { message: String },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::SessionEnd { .. })
    }
}
