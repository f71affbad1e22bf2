//! Build failure classification
//!
//! Classification never fails: when logs are missing or the reasoning
//! service errors, answers without JSON, or names an unknown class, the
//! result is [`FailureClass::Infrastructure`], which always escalates.

use super::types::{BuildTrackingState, FailureClass};
use crate::agent::AgentContext;
use crate::utils::text::tail;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::warn;

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("JSON_OBJECT is a compile-time constant"));

/// Classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Failure class
    pub class: FailureClass,
    /// Short root cause
    pub root_cause: String,
    /// Concrete fix suggestions
    #[serde(default)]
    pub fix_suggestions: Vec<String>,
}

impl Diagnosis {
    /// The safe default used whenever classification is not possible
    pub fn infrastructure(root_cause: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Infrastructure,
            root_cause: root_cause.into(),
            fix_suggestions: Vec::new(),
        }
    }
}

/// Turns a failed build into a [`Diagnosis`]
#[async_trait]
pub trait FailureClassifier: Send + Sync {
    /// Classify the current failure of `build`. `logs` is `None` when the
    /// build service could not provide them.
    async fn classify(&self, build: &BuildTrackingState, logs: Option<&str>) -> Diagnosis;
}

#[derive(Deserialize)]
struct RawDiagnosis {
    failure_type: String,
    #[serde(default)]
    root_cause: String,
    #[serde(default)]
    fix_suggestions: Vec<String>,
}

/// Classifier backed by the reasoning service
pub struct LlmFailureClassifier {
    ctx: AgentContext,
    excerpt_chars: usize,
}

impl LlmFailureClassifier {
    /// Classifier thinking as `ctx`, sending the last `excerpt_chars` of the log
    pub fn new(ctx: AgentContext, excerpt_chars: usize) -> Self {
        Self { ctx, excerpt_chars }
    }

    fn prompt(&self, build: &BuildTrackingState, logs: &str) -> String {
        format!(
            r#"Analyze this build failure.

Build ID: {build_id}
Repository: {repository}
Definition: {definition}
Branch: {branch}
Previous retries: {retries}

Log tail:
{logs}

Respond ONLY with a JSON object:
{{
  "failure_type": "intermittent|compilation_error|test_failure|infrastructure",
  "root_cause": "brief description",
  "fix_suggestions": ["specific suggestion"]
}}

Network timeouts, race conditions and flaky tests are intermittent."#,
            build_id = build.build_id,
            repository = build.repository,
            definition = build.definition,
            branch = build.branch,
            retries = build.retry_count,
            logs = tail(logs, self.excerpt_chars),
        )
    }
}

/// Parse a classifier answer; `None` when it has no usable classification.
pub fn parse_diagnosis(answer: &str) -> Option<Diagnosis> {
    let json = JSON_OBJECT.find(answer)?;
    let raw: RawDiagnosis = serde_json::from_str(json.as_str()).ok()?;
    let class = FailureClass::from_label(&raw.failure_type)?;
    Some(Diagnosis {
        class,
        root_cause: raw.root_cause,
        fix_suggestions: raw.fix_suggestions,
    })
}

#[async_trait]
impl FailureClassifier for LlmFailureClassifier {
    async fn classify(&self, build: &BuildTrackingState, logs: Option<&str>) -> Diagnosis {
        let Some(logs) = logs else {
            return Diagnosis::infrastructure("build logs unavailable");
        };

        let answer = match self.ctx.think(&self.prompt(build, logs)).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(build_id = build.build_id, error = %e, "Classifier unavailable, assuming infrastructure");
                return Diagnosis::infrastructure(format!("classifier unavailable: {e}"));
            }
        };

        parse_diagnosis(&answer).unwrap_or_else(|| {
            warn!(build_id = build.build_id, "Unusable classifier answer, assuming infrastructure");
            Diagnosis::infrastructure("classifier answer could not be interpreted")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_monitor::TrackRequest;
    use conveyor_llm::mock::ScriptedProvider;
    use conveyor_memory::Memory;
    use std::sync::Arc;

    fn classifier(llm: ScriptedProvider) -> LlmFailureClassifier {
        let ctx = AgentContext::new("build_monitor", "classify", Memory::in_memory(), Arc::new(llm));
        LlmFailureClassifier::new(ctx, 100)
    }

    fn build() -> BuildTrackingState {
        BuildTrackingState::new(&TrackRequest::new(1, "api", "api-ci", "feature/x"), 3)
    }

    #[test]
    fn test_parse_fenced_json() {
        let answer = "Here you go:\n```json\n{\"failure_type\": \"test_failure\", \"root_cause\": \"assertion\"}\n```";
        let diagnosis = parse_diagnosis(answer).unwrap();
        assert_eq!(diagnosis.class, FailureClass::TestFailure);
        assert_eq!(diagnosis.root_cause, "assertion");
    }

    #[test]
    fn test_parse_rejects_unknown_labels() {
        assert!(parse_diagnosis(r#"{"failure_type": "cosmic_rays"}"#).is_none());
        assert!(parse_diagnosis("looks flaky to me").is_none());
    }

    #[tokio::test]
    async fn test_classifies_from_llm_answer() {
        let c = classifier(ScriptedProvider::new().then_answer(
            r#"{"failure_type": "intermittent_failure", "fix_suggestions": ["retry"]}"#,
        ));
        let diagnosis = c.classify(&build(), Some("connection reset")).await;
        assert_eq!(diagnosis.class, FailureClass::Intermittent);
        assert_eq!(diagnosis.fix_suggestions, vec!["retry"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_infrastructure() {
        let c = classifier(ScriptedProvider::new().then_fail("offline").then_answer("no idea"));
        assert_eq!(c.classify(&build(), Some("log")).await.class, FailureClass::Infrastructure);
        assert_eq!(c.classify(&build(), Some("log")).await.class, FailureClass::Infrastructure);
    }

    #[tokio::test]
    async fn test_missing_logs_skip_the_llm() {
        let llm = Arc::new(ScriptedProvider::new());
        let ctx = AgentContext::new("build_monitor", "classify", Memory::in_memory(), llm.clone());
        let c = LlmFailureClassifier::new(ctx, 100);
        let diagnosis = c.classify(&build(), None).await;
        assert_eq!(diagnosis.class, FailureClass::Infrastructure);
        assert_eq!(llm.calls(), 0);
    }
}
