//! Provider selection from configuration

use crate::error::{Error, Result};
use crate::ollama::{OllamaConfig, OllamaProvider};
use crate::openai::{OpenAiConfig, OpenAiProvider};
use crate::provider::LlmProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// `[llm]` configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// `ollama` or `openai`
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Ollama settings
    #[serde(default)]
    pub ollama: OllamaSettings,
    /// OpenAI settings
    #[serde(default)]
    pub openai: OpenAiSettings,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// `[llm.ollama]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaSettings {
    /// Server URL
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// `[llm.openai]`
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct OpenAiSettings {
    /// API key; usually supplied through `CONVEYOR_LLM__OPENAI__API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
    /// API base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model name
    #[serde(default)]
    pub model: Option<String>,
}

impl std::fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("api_key", &self.api_key.as_deref().map(crate::util::mask_api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_ollama_url() -> String {
    crate::ollama::DEFAULT_BASE_URL.to_string()
}

fn default_ollama_model() -> String {
    crate::ollama::DEFAULT_MODEL.to_string()
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            ollama: OllamaSettings::default(),
            openai: OpenAiSettings::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Build the configured provider.
pub fn build_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>> {
    let timeout = Duration::from_secs(settings.timeout_secs.max(1));
    let provider: Arc<dyn LlmProvider> = match settings.provider.to_ascii_lowercase().as_str() {
        "ollama" => Arc::new(OllamaProvider::new(
            OllamaConfig::new()
                .with_base_url(&settings.ollama.base_url)
                .with_model(&settings.ollama.model)
                .with_timeout(timeout),
        )?),
        "openai" => {
            let key = settings.openai.api_key.clone().ok_or_else(|| {
                Error::NotConfigured("llm.openai.api_key is required for the openai provider".into())
            })?;
            let mut config = OpenAiConfig::new(key).with_timeout(timeout);
            if let Some(url) = &settings.openai.base_url {
                config = config.with_base_url(url);
            }
            if let Some(model) = &settings.openai.model {
                config = config.with_model(model);
            }
            Arc::new(OpenAiProvider::new(config)?)
        }
        other => return Err(Error::NotConfigured(format!("unknown llm provider: {other}"))),
    };
    info!(provider = provider.name(), model = provider.default_model(), "Reasoning provider ready");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_select_ollama() {
        let provider = build_provider(&LlmSettings::default()).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.default_model(), "llama3.1:8b");
    }

    #[test]
    fn test_openai_requires_key() {
        let settings = LlmSettings {
            provider: "openai".into(),
            ..Default::default()
        };
        assert!(matches!(build_provider(&settings), Err(Error::NotConfigured(_))));
    }

    #[test]
    fn test_unknown_provider() {
        let settings = LlmSettings {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(build_provider(&settings).is_err());
    }
}
