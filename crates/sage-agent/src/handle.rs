//! Per-session control: cancellation and the event channel.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::AgentEvent;

/// Capacity of each session's event channel
const EVENT_CAPACITY: usize = 256;

/// A cloneable handle for one session.
///
/// The loop checks it before every model step and every tool call; tools
/// receive the underlying token so long-running work can stop early. Every
/// event the session emits goes to this handle's channel only, so concurrent
/// sessions on one agent never mix their events.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cancel: CancellationToken,
    events: broadcast::Sender<AgentEvent>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The token handed to model clients and tools
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribe to this session's events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &broadcast::Sender<AgentEvent> {
        &self.events
    }
}
