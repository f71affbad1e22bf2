//! Reasoning provider trait

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::Result;
use crate::message::Message;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Incremental completion output.
pub type CompletionStream = BoxStream<'static, Result<String>>;

/// Result of a provider health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Provider name
    pub provider: String,
    /// Whether the provider can serve completions
    pub healthy: bool,
    /// Model completions will use
    pub model: String,
    /// Human-readable detail
    pub detail: String,
}

/// Trait for reasoning providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Complete a conversation
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Complete a conversation, yielding content as it is produced.
    ///
    /// Providers without native streaming yield the whole answer as one chunk.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let response = self.complete(request).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(response.content)
        })))
    }

    /// Probe whether the provider is reachable and able to answer.
    async fn health_check(&self) -> Result<HealthStatus> {
        let request = CompletionRequest::from_messages(vec![Message::user("ping")])
            .with_max_tokens(1);
        self.complete(request).await?;
        Ok(HealthStatus {
            provider: self.name().to_string(),
            healthy: true,
            model: self.default_model().to_string(),
            detail: "completion succeeded".to_string(),
        })
    }
}
