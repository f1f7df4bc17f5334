//! sage-ai: the model boundary
//!
//! Message and content types shared by the agent loop, plus streaming clients
//! for the supported LLM providers (Google Gemini and OpenAI-compatible chat
//! completions).

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::MessageEventStream;
pub use types::*;
