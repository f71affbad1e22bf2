//! Scripted provider for tests and dry runs
//!
//! Answers are consumed in order; once the script is exhausted the
//! provider keeps returning its fallback answer.

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::{Error, Result};
use crate::provider::LlmProvider;
use std::collections::VecDeque;
use std::sync::Mutex;

enum Scripted {
    Answer(String),
    Fail(String),
}

/// A provider that replays queued answers.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
    fallback: String,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// Provider with an empty script and the fallback answer `"mock response"`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback: "mock response".to_string(),
        }
    }

    /// Answer used once the script runs out.
    #[must_use]
    pub fn with_fallback(mut self, answer: impl Into<String>) -> Self {
        self.fallback = answer.into();
        self
    }

    /// Queue an answer.
    #[must_use]
    pub fn then_answer(self, answer: impl Into<String>) -> Self {
        self.push(Scripted::Answer(answer.into()));
        self
    }

    /// Queue a provider failure.
    #[must_use]
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()));
        self
    }

    fn push(&self, item: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Copies of every request received.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let content = match next {
            Some(Scripted::Answer(answer)) => answer,
            Some(Scripted::Fail(message)) => return Err(Error::Unavailable(message)),
            None => self.fallback.clone(),
        };
        Ok(CompletionResponse {
            content,
            usage: None,
            finish_reason: Some("stop".to_string()),
            model: "mock-model".to_string(),
        })
    }
}
