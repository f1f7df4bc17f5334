//! Streaming event types and utilities

use crate::types::{Content, Message, StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a provider streams a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Initial message structure
    Start { message: Message },
    /// Text content delta
    TextDelta { content_index: usize, delta: String },
    /// Tool call started
    ToolCallStart {
        content_index: usize,
        id: String,
        name: String,
    },
    /// Tool call arguments delta (partial JSON)
    ToolCallDelta { content_index: usize, delta: String },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Accumulates streaming deltas into a partial assistant message
#[derive(Debug, Default)]
pub struct MessageBuilder {
    buffers: Vec<ContentBuffer>,
}

#[derive(Debug)]
enum ContentBuffer {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the partial message
    pub fn process_event(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::TextDelta {
                content_index,
                delta,
            } => match self.slot(*content_index) {
                ContentBuffer::Text(text) => text.push_str(delta),
                slot => *slot = ContentBuffer::Text(delta.clone()),
            },
            MessageEvent::ToolCallStart {
                content_index,
                id,
                name,
            } => {
                *self.slot(*content_index) = ContentBuffer::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments_json: String::new(),
                };
            }
            MessageEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                if let Some(ContentBuffer::ToolCall { arguments_json, .. }) =
                    self.buffers.get_mut(*content_index)
                {
                    arguments_json.push_str(delta);
                }
            }
            _ => {}
        }
    }

    /// Snapshot of the content received so far
    pub fn current_content(&self) -> Vec<Content> {
        self.buffers
            .iter()
            .filter_map(|buf| match buf {
                ContentBuffer::Text(text) if text.is_empty() => None,
                ContentBuffer::Text(text) => Some(Content::text(text.clone())),
                ContentBuffer::ToolCall {
                    id,
                    name,
                    arguments_json,
                } => {
                    let arguments = serde_json::from_str(arguments_json).unwrap_or_default();
                    Some(Content::tool_call(id.clone(), name.clone(), arguments))
                }
            })
            .collect()
    }

    /// Snapshot as an assistant message
    pub fn current_message(&self) -> Message {
        Message::assistant_with_content(self.current_content())
    }

    fn slot(&mut self, index: usize) -> &mut ContentBuffer {
        while self.buffers.len() <= index {
            self.buffers.push(ContentBuffer::Text(String::new()));
        }
        &mut self.buffers[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_accumulates_text() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::TextDelta {
            content_index: 0,
            delta: "Hel".into(),
        });
        builder.process_event(&MessageEvent::TextDelta {
            content_index: 0,
            delta: "lo".into(),
        });
        assert_eq!(builder.current_message().text(), "Hello");
    }

    #[test]
    fn test_builder_tool_call_arguments() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::ToolCallStart {
            content_index: 1,
            id: "c1".into(),
            name: "reverse_text".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 1,
            delta: "{\"text\":".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 1,
            delta: "\"abc\"}".into(),
        });

        let msg = builder.current_message();
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "reverse_text");
        assert_eq!(calls[0].arguments, json!({"text": "abc"}));
    }

    #[test]
    fn test_partial_arguments_are_null() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::ToolCallStart {
            content_index: 0,
            id: "c1".into(),
            name: "t".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 0,
            delta: "{\"a\":".into(),
        });
        let content = builder.current_content();
        assert_eq!(
            content[0].as_tool_call().unwrap().arguments,
            serde_json::Value::Null
        );
    }
}
