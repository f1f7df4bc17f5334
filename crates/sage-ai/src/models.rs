//! Built-in model catalogue with a lookup API.

use std::collections::HashMap;

use crate::{Api, Model, Provider};

/// Default model used when nothing is configured
pub const DEFAULT_MODEL_ID: &str = "gemini-2.0-flash";

struct ModelEntry {
    id: &'static str,
    name: &'static str,
    provider: Provider,
    context_window: u32,
    max_tokens: u32,
}

const MODEL_ENTRIES: &[ModelEntry] = &[
    ModelEntry {
        id: "gemini-2.0-flash",
        name: "Gemini 2.0 Flash",
        provider: Provider::Google,
        context_window: 1_048_576,
        max_tokens: 8192,
    },
    ModelEntry {
        id: "gemini-2.0-flash-exp",
        name: "Gemini 2.0 Flash (experimental)",
        provider: Provider::Google,
        context_window: 1_048_576,
        max_tokens: 8192,
    },
    ModelEntry {
        id: "gemini-2.5-flash",
        name: "Gemini 2.5 Flash",
        provider: Provider::Google,
        context_window: 1_048_576,
        max_tokens: 65_536,
    },
    ModelEntry {
        id: "gemini-2.5-pro",
        name: "Gemini 2.5 Pro",
        provider: Provider::Google,
        context_window: 1_048_576,
        max_tokens: 65_536,
    },
    ModelEntry {
        id: "gpt-4o",
        name: "GPT-4o",
        provider: Provider::OpenAI,
        context_window: 128_000,
        max_tokens: 16_384,
    },
    ModelEntry {
        id: "gpt-4o-mini",
        name: "GPT-4o mini",
        provider: Provider::OpenAI,
        context_window: 128_000,
        max_tokens: 16_384,
    },
    ModelEntry {
        id: "llama-3.3-70b-versatile",
        name: "Llama 3.3 70B (Groq)",
        provider: Provider::Groq,
        context_window: 131_072,
        max_tokens: 32_768,
    },
];

impl ModelEntry {
    fn to_model(&self) -> Model {
        let (api, base_url) = self.provider.endpoint();
        Model {
            id: self.id.to_string(),
            name: self.name.to_string(),
            api,
            provider: self.provider,
            base_url: base_url.to_string(),
            context_window: self.context_window,
            max_tokens: self.max_tokens,
            headers: HashMap::new(),
        }
    }
}

/// Look up a model by provider and ID.
pub fn get_model(provider: Provider, id: &str) -> Option<Model> {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == id && e.provider == provider)
        .map(ModelEntry::to_model)
}

/// Look up a model by ID only (first match across all providers).
pub fn get_model_by_id(id: &str) -> Option<Model> {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == id)
        .map(ModelEntry::to_model)
}

/// Resolve a model, falling back to a custom entry for unknown ids.
pub fn resolve(provider: Provider, id: &str) -> Model {
    get_model(provider, id).unwrap_or_else(|| Model::custom(provider, id))
}

/// Get all registered models.
pub fn get_all_models() -> Vec<Model> {
    MODEL_ENTRIES.iter().map(ModelEntry::to_model).collect()
}

/// Whether a model speaks the Gemini protocol
pub fn is_gemini(model: &Model) -> bool {
    model.api == Api::GoogleGenerativeAI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_is_registered() {
        let model = get_model_by_id(DEFAULT_MODEL_ID).unwrap();
        assert_eq!(model.provider, Provider::Google);
        assert!(is_gemini(&model));
    }

    #[test]
    fn test_resolve_unknown_falls_back() {
        let model = resolve(Provider::Ollama, "qwen2.5:7b");
        assert_eq!(model.id, "qwen2.5:7b");
        assert_eq!(model.api, Api::OpenAICompletions);
        assert_eq!(model.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_get_model_checks_provider() {
        assert!(get_model(Provider::OpenAI, "gpt-4o").is_some());
        assert!(get_model(Provider::Google, "gpt-4o").is_none());
    }
}
