//! Configuration file support

use sage_ai::Provider;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Configuration for sage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default provider (google, openai, groq, openrouter, ollama)
    pub provider: Option<String>,
    /// Default model to use
    pub model: Option<String>,
    /// Maximum model steps per question
    pub max_turns: Option<u32>,
    /// Run the tool calls of one reply concurrently
    pub parallel_tools: Option<bool>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Retries for transient provider errors (default: none)
    pub max_retries: Option<u32>,
    /// Directory holding the SQLite databases the database tools may open
    pub data_dir: Option<PathBuf>,
    /// Python interpreter used by the code tools
    pub python: Option<String>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub google: Option<String>,
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
    pub tavily: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sage")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SAGE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Write the example config if no config file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Get the model API key for a provider, checking config then env
    pub fn get_api_key(&self, provider: Provider) -> Option<String> {
        let from_config = match provider {
            Provider::Google => self.api_keys.google.clone(),
            Provider::OpenAI => self.api_keys.openai.clone(),
            Provider::Groq => self.api_keys.groq.clone(),
            Provider::OpenRouter => self.api_keys.openrouter.clone(),
            Provider::Ollama | Provider::Custom => None,
        };
        if from_config.is_some() {
            return from_config;
        }

        let env_var = provider.api_key_env_var()?;
        std::env::var(env_var).ok().or_else(|| match provider {
            Provider::Google => std::env::var("GEMINI_API_KEY").ok(),
            _ => None,
        })
    }

    /// Get the web search key, checking config then `TAVILY_API_KEY`
    pub fn tavily_api_key(&self) -> Option<String> {
        self.api_keys
            .tavily
            .clone()
            .or_else(|| std::env::var("TAVILY_API_KEY").ok())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# sage configuration file
# Place at ~/.config/sage/config.toml (Linux/Mac) or %APPDATA%\sage\config.toml (Windows)

# Default provider (google, openai, groq, openrouter, ollama)
provider = "google"

# Default model to use
model = "gemini-2.0-flash"

# Maximum model steps per question
max_turns = 25

# Run the tool calls of one reply concurrently
parallel_tools = false

# Sampling temperature
temperature = 0.7

# Retries for rate limits and overloaded providers
max_retries = 0

# Directory holding SQLite databases for the database tools
data_dir = "data"

# Python interpreter for the code tools
python = "python3"

# API keys (optional - can also use environment variables
# GOOGLE_API_KEY, OPENAI_API_KEY, GROQ_API_KEY, OPENROUTER_API_KEY, TAVILY_API_KEY)
[api_keys]
# google = "..."
# openai = "sk-..."
# tavily = "tvly-..."
"#
}
