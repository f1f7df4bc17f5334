//! Tool trait and argument helpers

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure of a single tool invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Arguments were missing or had the wrong shape
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool's own logic failed
    #[error("{0}")]
    Execution(String),

    /// The session was cancelled while the tool ran
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn execution(message: impl std::fmt::Display) -> Self {
        Self::Execution(message.to_string())
    }

    pub fn invalid(message: impl std::fmt::Display) -> Self {
        Self::InvalidArguments(message.to_string())
    }
}

/// Text produced by a tool, or why it could not produce any
pub type ToolOutput = Result<String, ToolError>;

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls and as the registry key)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with already-validated arguments
    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a sage_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> sage_ai::Tool {
    sage_ai::Tool::new(tool.name(), tool.description(), tool.parameters_schema())
}

/// Required string argument
pub fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid(format!("'{}' must be a string", key)))
}

/// Optional string argument
pub fn opt_str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Integer argument with a default when absent
pub fn int_arg(args: &Value, key: &str, default: i64) -> Result<i64, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| ToolError::invalid(format!("'{}' must be an integer", key))),
    }
}
