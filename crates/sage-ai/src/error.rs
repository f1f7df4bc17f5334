//! Error types for sage-ai

use thiserror::Error;

/// Result type alias using sage-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while talking to a model provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Request was cancelled by the caller
    #[error("Request aborted")]
    Aborted,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// The provider stream ended or produced something we could not use
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Whether a retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Sse(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("unavailable")
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
                    || msg.contains("temporarily unavailable")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_stream_errors() {
        assert!(Error::Sse("connection reset".into()).is_retryable());
        assert!(!Error::UnexpectedResponse("no candidates".into()).is_retryable());
    }

    #[test]
    fn test_retryable_api_rate_limit() {
        assert!(Error::api("rate_limit_error", "slow down").is_retryable());
        assert!(Error::api("error", "Rate limit exceeded, please retry").is_retryable());
    }

    #[test]
    fn test_retryable_gemini_unavailable() {
        let e = Error::api("UNAVAILABLE", "The model is overloaded. Please try again later.");
        assert!(e.is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        assert!(!Error::api("INVALID_ARGUMENT", "bad schema").is_retryable());
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::InvalidConfig("x".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_message() {
        let e = Error::api("PERMISSION_DENIED", "API key not valid");
        assert_eq!(
            e.to_string(),
            "API error: API key not valid (type: PERMISSION_DENIED)"
        );
    }
}
