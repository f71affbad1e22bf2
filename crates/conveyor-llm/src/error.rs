//! Error types for conveyor-llm

use thiserror::Error;

/// LLM error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// API rejected the request
    #[error("api error: {0}")]
    Api(String),

    /// Provider answered with a server-side failure
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimit,

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),
}

impl Error {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::RateLimit | Self::Network(_) | Self::Timeout(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
