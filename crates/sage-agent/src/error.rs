//! Error types for sage-agent

use thiserror::Error;

/// Result type alias using sage-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while assembling an agent.
///
/// Nothing here escapes a running session: the loop downgrades every
/// model and tool failure into a message on the conversation.
#[derive(Error, Debug)]
pub enum Error {
    /// Two tools were registered under the same name
    #[error("duplicate tool name: {name}")]
    DuplicateTool { name: String },

    /// Lookup of a name that is not in the registry
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// A tool declared a parameter schema that does not compile
    #[error("invalid parameter schema for tool '{tool}': {message}")]
    InvalidSchema { tool: String, message: String },

    /// An error from the model layer
    #[error(transparent)]
    Ai(#[from] sage_ai::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_tool() {
        let err = Error::DuplicateTool {
            name: "reverse_text".into(),
        };
        assert_eq!(err.to_string(), "duplicate tool name: reverse_text");

        let err = Error::InvalidSchema {
            tool: "t".into(),
            message: "bad type".into(),
        };
        assert!(err.to_string().contains("'t'"));
    }

    #[test]
    fn test_ai_error_is_transparent() {
        let err: Error = sage_ai::Error::InvalidApiKey.into();
        assert_eq!(err.to_string(), sage_ai::Error::InvalidApiKey.to_string());
    }
}
