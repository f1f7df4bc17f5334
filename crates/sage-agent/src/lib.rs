//! sage-agent: the tool-augmented agent loop
//!
//! A session alternates between a model step and a tool dispatch step until
//! the model answers without requesting tools. All state for one session
//! lives in a [`ConversationState`]; tools are shared through an immutable
//! [`ToolRegistry`].

pub mod agent;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handle;
pub mod model_step;
pub mod prompt;
pub mod registry;
pub mod router;
pub mod state;
pub mod tool;

pub use agent::{Agent, AgentConfig, LoopState, SessionOutcome, Termination};
pub use dispatch::{DispatchOutcome, DispatchRecord};
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use handle::SessionHandle;
pub use model_step::{ModelClient, ModelRequest, ProviderClient, RetryConfig};
pub use registry::ToolRegistry;
pub use router::{Route, route};
pub use state::{ConversationState, NextAction};
pub use tool::{BoxedTool, Tool, ToolError, ToolOutput};
