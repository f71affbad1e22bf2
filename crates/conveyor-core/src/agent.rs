//! Agent context: identity, memory stream and reasoning
//!
//! Every flow and the build monitor own an [`AgentContext`]. All memory
//! writes go through it so entries are tagged with the agent's id and
//! session.

use crate::error::Result;
use chrono::{Duration as ChronoDuration, Utc};
use conveyor_llm::{CompletionRequest, LlmProvider, Message};
use conveyor_memory::{ActionRecord, Memory, MemoryEntry, MemoryKind, Metadata, RecentQuery};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const CONTEXT_MEMORIES: usize = 5;
const CONTEXT_SNIPPET_CHARS: usize = 200;

/// Identity plus capabilities shared by one agent
#[derive(Clone)]
pub struct AgentContext {
    agent_id: String,
    session_id: String,
    system_prompt: String,
    memory: Memory,
    llm: Arc<dyn LlmProvider>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent_id", &self.agent_id)
            .field("session_id", &self.session_id)
            .field("llm", &self.llm.name())
            .finish()
    }
}

impl AgentContext {
    /// New agent with a fresh session id
    pub fn new(
        agent_id: impl Into<String>,
        system_prompt: impl Into<String>,
        memory: Memory,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
            system_prompt: system_prompt.into(),
            memory,
            llm,
        }
    }

    /// Agent id
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Memory handle
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    async fn remember(&self, kind: MemoryKind, content: String, metadata: Metadata) {
        let mut entry =
            MemoryEntry::new(&self.agent_id, kind, content).with_session(&self.session_id);
        entry.metadata = metadata;
        self.memory.append(entry).await;
    }

    /// Record something the agent saw
    pub async fn observe(&self, observation: impl Into<String>, metadata: Metadata) {
        let observation = observation.into();
        debug!(agent_id = %self.agent_id, %observation, "Observed");
        self.remember(MemoryKind::Observation, observation, metadata).await;
    }

    /// Record a decision. Callers write this before acting on it.
    pub async fn decide(&self, decision: impl Into<String>, metadata: Metadata) {
        let decision = decision.into();
        debug!(agent_id = %self.agent_id, %decision, "Decided");
        self.remember(MemoryKind::Decision, decision, metadata).await;
    }

    /// Record the outcome of a unit of work
    pub async fn record_result(&self, summary: impl Into<String>, success: bool, mut metadata: Metadata) {
        metadata.insert("success".to_string(), Value::Bool(success));
        self.remember(MemoryKind::Result, summary.into(), metadata).await;
    }

    /// Log an action record under this agent and session
    pub async fn record_action(&self, record: ActionRecord) {
        let mut record = record;
        record.agent_id = self.agent_id.clone();
        record.session_id = Some(self.session_id.clone());
        self.memory.log_action(record).await;
    }

    /// Ask the reasoning service, with recent session memories as context.
    pub async fn think(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();

        let query = RecentQuery::new(&self.agent_id)
            .session(&self.session_id)
            .since(Utc::now() - ChronoDuration::hours(24))
            .limit(CONTEXT_MEMORIES);
        let recent = self.memory.recent(&query).await;

        let mut messages = vec![Message::system(&self.system_prompt)];
        if !recent.is_empty() {
            let context = recent
                .iter()
                .map(|m| format!("- {}", crate::utils::text::truncate(&m.content, CONTEXT_SNIPPET_CHARS)))
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(Message::system(format!("Recent context:\n{context}")));
        }
        messages.push(Message::user(prompt));

        let request = CompletionRequest::from_messages(messages).with_temperature(0.2);
        let prompt_excerpt = crate::utils::text::truncate(prompt, CONTEXT_SNIPPET_CHARS);

        match self.llm.complete(request).await {
            Ok(response) => {
                let mut metadata = Metadata::new();
                metadata.insert("model".to_string(), json!(response.model));
                if let Some(usage) = &response.usage {
                    metadata.insert("total_tokens".to_string(), json!(usage.total_tokens));
                }
                self.remember(
                    MemoryKind::Conversation,
                    format!("User: {prompt}\nAssistant: {}", response.content),
                    metadata,
                )
                .await;
                self.record_action(
                    ActionRecord::new(&self.agent_id, "think", "llm")
                        .with_parameters(json!({ "message": prompt_excerpt }))
                        .with_result(json!({
                            "content": crate::utils::text::truncate(&response.content, CONTEXT_SNIPPET_CHARS)
                        }))
                        .with_duration(started.elapsed()),
                )
                .await;
                Ok(response.content)
            }
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "Reasoning call failed");
                self.record_action(
                    ActionRecord::new(&self.agent_id, "think", "llm")
                        .with_parameters(json!({ "message": prompt_excerpt }))
                        .with_result(json!({ "error": e.to_string() }))
                        .with_success(false)
                        .with_duration(started.elapsed()),
                )
                .await;
                Err(e.into())
            }
        }
    }
}

/// Build a metadata map from `key => value` pairs.
macro_rules! metadata {
    () => { ::conveyor_memory::Metadata::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = ::conveyor_memory::Metadata::new();
        $( map.insert(($key).to_string(), ::serde_json::json!($value)); )+
        map
    }};
}

pub(crate) use metadata;

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_llm::mock::ScriptedProvider;

    fn agent(llm: Arc<ScriptedProvider>) -> AgentContext {
        AgentContext::new("requirements", "You analyze requirements.", Memory::in_memory(), llm)
    }

    #[tokio::test]
    async fn test_think_records_conversation_and_action() {
        let llm = Arc::new(ScriptedProvider::new().then_answer("two repositories"));
        let ctx = agent(llm.clone());

        let answer = ctx.think("Which repositories?").await.unwrap();
        assert_eq!(answer, "two repositories");

        let entries = ctx
            .memory()
            .recent(&RecentQuery::new("requirements").kind(MemoryKind::Conversation))
            .await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].content.contains("Assistant: two repositories"));
        assert_eq!(entries[0].session_id.as_deref(), Some(ctx.session_id()));

        let stats = ctx.memory().statistics("requirements", Some("think")).await;
        assert_eq!(stats.count, 1);
        assert_eq!(stats.successes, 1);
    }

    #[tokio::test]
    async fn test_think_includes_recent_context() {
        let llm = Arc::new(ScriptedProvider::new());
        let ctx = agent(llm.clone());
        ctx.observe("story 42 touches billing", metadata!()).await;

        ctx.think("plan it").await.unwrap();
        let request = &llm.requests()[0];
        assert_eq!(request.messages.len(), 3);
        assert!(request.messages[1].content.contains("story 42 touches billing"));
        assert_eq!(request.messages[2].content, "plan it");
    }

    #[tokio::test]
    async fn test_failed_think_is_logged_and_returned() {
        let llm = Arc::new(ScriptedProvider::new().then_fail("connection refused"));
        let ctx = agent(llm);

        assert!(ctx.think("hello").await.is_err());
        let stats = ctx.memory().statistics("requirements", Some("think")).await;
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn test_record_result_marks_success() {
        let ctx = agent(Arc::new(ScriptedProvider::new()));
        ctx.record_result("done", false, metadata!("repository" => "api")).await;

        let entries = ctx
            .memory()
            .recent(&RecentQuery::new("requirements").kind(MemoryKind::Result))
            .await;
        assert_eq!(entries[0].metadata["success"], json!(false));
        assert_eq!(entries[0].metadata["repository"], json!("api"));
    }
}
