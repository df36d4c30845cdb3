//! Provider settings loaded from a JSON file at startup.
//!
//! ```json
//! {
//!   "apiKey": "sk-…",
//!   "model": "gpt-4o-mini",
//!   "temperature": 0.7,
//!   "apiEndpoint": "https://api.openai.com/v1/chat/completions",
//!   "qianwenAPIKey": "sk-…",
//!   "qianwenEndpoint": "https://dashscope.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation"
//! }
//! ```
//!
//! Absent keys fall back to empty values; nothing beyond JSON syntax is
//! validated here; a bad endpoint surfaces as a provider error on first use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Text-to-image model used when the config file does not name one.
pub const DEFAULT_IMAGE_MODEL: &str = "qwen-image-plus";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bearer token for the chat-completion provider.
    #[serde(rename = "apiKey")]
    pub api_key: String,

    pub model: String,

    pub temperature: f64,

    /// Full URL of the OpenAI-compatible chat-completions endpoint.
    #[serde(rename = "apiEndpoint")]
    pub api_endpoint: String,

    #[serde(rename = "qianwenAPIKey")]
    pub image_api_key: String,

    #[serde(rename = "qianwenEndpoint")]
    pub image_endpoint: String,

    #[serde(rename = "qianwenModel")]
    pub image_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            temperature: 0.0,
            api_endpoint: String::new(),
            image_api_key: String::new(),
            image_endpoint: String::new(),
            image_model: DEFAULT_IMAGE_MODEL.to_owned(),
        }
    }
}

impl Config {
    /// Reads and parses the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

// Keys stay out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_endpoint", &self.api_endpoint)
            .field("image_api_key", &redact(&self.image_api_key))
            .field("image_endpoint", &self.image_endpoint)
            .field("image_model", &self.image_model)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

/// Process-level settings that do not live in the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    /// System prompt for the organize intent, read on every such request.
    pub prompt_path: PathBuf,
    /// Where generated images are saved.
    pub image_dir: PathBuf,
    /// Per-call timeout for both providers.
    pub upstream_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prompt_path: PathBuf::from("classify_prompt.txt"),
            image_dir: PathBuf::from("."),
            upstream_timeout: Duration::from_secs(120),
        }
    }
}
