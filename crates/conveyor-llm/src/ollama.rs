//! Ollama - local model provider
//!
//! Talks to a local (or LAN) Ollama server over `/api/chat` and `/api/tags`.
//! Streaming responses arrive as newline-delimited JSON objects.

use crate::completion::{CompletionRequest, CompletionResponse, TokenUsage};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::provider::{CompletionStream, HealthStatus, LlmProvider};
use crate::util::{status_error, transport_error};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default model
pub const DEFAULT_MODEL: &str = "llama3.1:8b";

/// Default Ollama endpoint
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaResponseMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server
    pub base_url: String,
    /// Model used when a request does not name one
    pub default_model: String,
    /// Default generation budget
    pub default_max_tokens: u32,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_max_tokens: 4096,
            timeout: Duration::from_secs(300),
        }
    }
}

impl OllamaConfig {
    /// Default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

    /// Set the default max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Ollama provider
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a provider from configuration
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout.as_millis() as u64
    }

    /// Models installed on the server
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout_ms()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role.as_str(),
                content: msg.content.clone(),
            })
            .collect()
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OllamaChatRequest {
        let model = if request.model.is_empty() {
            self.config.default_model.clone()
        } else {
            request.model.clone()
        };
        OllamaChatRequest {
            model,
            messages: Self::convert_messages(&request.messages),
            options: Some(OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens.or(Some(self.config.default_max_tokens)),
                stop: request.stop.clone(),
            }),
            stream,
        }
    }

    async fn post_chat(&self, body: &OllamaChatRequest) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.config.base_url);
        debug!(model = %body.model, stream = body.stream, "Sending request to Ollama");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout_ms()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(response)
    }
}

fn parse_chunk(line: &[u8]) -> Result<OllamaChatResponse> {
    serde_json::from_slice(line).map_err(|e| Error::InvalidResponse(e.to_string()))
}

/// Pops the next complete line out of `buf`, if any.
fn next_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = buf.drain(..=pos).collect();
    line.pop();
    Some(line)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_request(&request, false);
        let response = self.post_chat(&body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&e, self.timeout_ms()))?;
        let response = parse_chunk(text.as_bytes())?;

        let usage = match (response.prompt_eval_count, response.eval_count) {
            (Some(prompt), Some(completion)) => Some(TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
            _ => None,
        };

        Ok(CompletionResponse {
            content: response.message.content,
            usage,
            finish_reason: response.done_reason,
            model: response.model,
        })
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let body = self.build_request(&request, true);
        let response = self.post_chat(&body).await?;
        let bytes = Box::pin(response.bytes_stream());
        let timeout_ms = self.timeout_ms();

        let stream = futures::stream::unfold(
            (bytes, Vec::new(), false),
            move |(mut bytes, mut buf, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    if let Some(line) = next_line(&mut buf) {
                        if is_blank(&line) {
                            continue;
                        }
                        return Some(match parse_chunk(&line) {
                            Ok(chunk) => {
                                let done = chunk.done;
                                (Ok(chunk.message.content), (bytes, buf, done))
                            }
                            Err(e) => (Err(e), (bytes, buf, true)),
                        });
                    }
                    match bytes.next().await {
                        Some(Ok(data)) => buf.extend_from_slice(&data),
                        Some(Err(e)) => {
                            return Some((Err(transport_error(&e, timeout_ms)), (bytes, buf, true)))
                        }
                        None if is_blank(&buf) => return None,
                        None => {
                            let rest = std::mem::take(&mut buf);
                            let item = parse_chunk(&rest).map(|chunk| chunk.message.content);
                            return Some((item, (bytes, buf, true)));
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let models = self.list_models().await?;
        let wanted = &self.config.default_model;
        let installed = models
            .iter()
            .any(|m| m == wanted || m.split(':').next() == Some(wanted.as_str()));
        Ok(HealthStatus {
            provider: self.name().to_string(),
            healthy: installed,
            model: wanted.clone(),
            detail: if installed {
                format!("{} models installed", models.len())
            } else {
                format!("model {wanted} is not installed; run `ollama pull {wanted}`")
            },
        })
    }
}
