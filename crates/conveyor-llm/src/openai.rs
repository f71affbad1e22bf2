//! OpenAI-compatible chat completions provider
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` and `/models` endpoints.

use crate::completion::{CompletionRequest, CompletionResponse, TokenUsage};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::provider::{HealthStatus, LlmProvider};
use crate::util::{mask_api_key, status_error, transport_error};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default model
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI provider configuration
pub struct OpenAiConfig {
    /// API key
    pub api_key: SecretString,
    /// API base URL (no trailing slash)
    pub base_url: String,
    /// Model used when a request does not name one
    pub default_model: String,
    /// Request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &mask_api_key(self.api_key.expose_secret()))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiConfig {
    /// Configuration with the default endpoint and model
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenAI-compatible provider
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create a provider from configuration
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(Error::NotConfigured("OpenAI API key is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout.as_millis() as u64
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&e, self.timeout_ms()))?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = if request.model.is_empty() {
            self.config.default_model.as_str()
        } else {
            request.model.as_str()
        };
        let body = ChatRequest {
            model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop.as_deref(),
        };
        debug!(model, messages = request.messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout_ms()))?;

        let parsed: ChatResponse = self.get_json(response).await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidResponse("no choices returned".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: parsed.usage,
            finish_reason: choice.finish_reason,
            model: parsed.model,
        })
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout_ms()))?;
        let _: serde_json::Value = self.get_json(response).await?;
        Ok(HealthStatus {
            provider: self.name().to_string(),
            healthy: true,
            model: self.config.default_model.clone(),
            detail: format!("{} reachable", self.config.base_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(matches!(
            OpenAiProvider::new(OpenAiConfig::new("  ")),
            Err(Error::NotConfigured(_))
        ));
    }

    #[test]
    fn test_debug_masks_key() {
        let config = OpenAiConfig::new("sk-1234567890abcdefghij");
        let printed = format!("{config:?}");
        assert!(printed.contains("sk-1...ghij"));
        assert!(!printed.contains("567890abcdef"));
    }

    #[test]
    fn test_response_parsing() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("ok"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 4);
    }
}
