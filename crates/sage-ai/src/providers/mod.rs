//! LLM provider implementations

pub mod google;
pub mod openai;

use crate::{Api, Context, Error, MessageEventStream, Model, Result, StreamOptions};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response from the LLM
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}

/// Build the provider client that speaks `model.api`.
pub fn for_model(model: &Model, api_key: Option<&str>) -> Result<Box<dyn LlmProvider>> {
    match model.api {
        Api::GoogleGenerativeAI => {
            let provider = match api_key {
                Some(key) => google::GoogleProvider::new(key),
                None => google::GoogleProvider::from_env()?,
            };
            Ok(Box::new(provider))
        }
        Api::OpenAICompletions => {
            if model.base_url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "model '{}' has no base URL",
                    model.id
                )));
            }
            let key = match (api_key, model.provider.api_key_env_var()) {
                (Some(key), _) => Some(key.to_string()),
                (None, Some(var)) => Some(get_api_key(None, var)?),
                // Local endpoints such as Ollama take no key
                (None, None) => None,
            };
            Ok(Box::new(openai::OpenAIProvider::new(key)))
        }
    }
}

/// JSON content type plus any per-model extra headers
pub(crate) fn request_headers(model: &Model) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    for (key, value) in &model.headers {
        if let (Ok(name), Ok(val)) = (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            headers.insert(name, val);
        }
    }
    headers
}
