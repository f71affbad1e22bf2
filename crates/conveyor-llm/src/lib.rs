//! Conveyor LLM - reasoning service abstraction
//!
//! Agents ask a reasoning service to classify build logs, plan changes and
//! draft text. This crate provides:
//! - [`LlmProvider`]: the seam every agent talks to
//! - Ollama (local) and OpenAI-compatible providers
//! - [`mock::ScriptedProvider`] for deterministic tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod completion;
pub mod config;
pub mod error;
pub mod message;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod util;

pub use completion::{CompletionRequest, CompletionResponse, TokenUsage};
pub use config::{build_provider, LlmSettings, OllamaSettings, OpenAiSettings};
pub use error::{Error, Result};
pub use message::{Message, MessageRole};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use provider::{CompletionStream, HealthStatus, LlmProvider};
