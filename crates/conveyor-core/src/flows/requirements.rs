//! Requirements analysis and feature splitting

use crate::agent::{metadata, AgentContext};
use crate::collaborators::{Fields, WorkItem, WorkItemService};
use crate::error::Result;
use crate::repository::RepositoryBinding;
use crate::utils::{call_with_backoff, RetryConfig};
use conveyor_llm::LlmProvider;
use conveyor_memory::{Memory, Metadata, WorkItemSnapshot};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

/// Agent id the flow writes memory under
pub const REQUIREMENTS_AGENT_ID: &str = "requirements";

const SYSTEM_PROMPT: &str = "You are the Requirements agent of an automated delivery system. \
You analyze work items, identify affected components, list assumptions and missing \
information explicitly, and break features into implementable user stories.";

const COMPLEXITY_INDICATORS: [&str; 6] = [
    "complex",
    "difficult",
    "multiple",
    "integration",
    "migration",
    "refactor",
];

static STORY_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:#+[ \t]*|\*\*)?(?:user[ \t]+)?story[ \t]+\d+\b")
        .expect("STORY_HEADING is a compile-time constant")
});

/// Rough implementation effort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    /// No complexity indicators
    Low,
    /// One indicator
    Medium,
    /// Two indicators
    High,
    /// Three or more
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl Complexity {
    /// Estimate from analysis text
    pub fn estimate(analysis: &str) -> Self {
        let lower = analysis.to_lowercase();
        match COMPLEXITY_INDICATORS
            .iter()
            .filter(|indicator| lower.contains(*indicator))
            .count()
        {
            0 => Self::Low,
            1 => Self::Medium,
            2 => Self::High,
            _ => Self::VeryHigh,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::VeryHigh => "Very High",
        })
    }
}

/// Result of analyzing a work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Work item id
    pub work_item_id: u64,
    /// Work item title
    pub title: String,
    /// Reasoning service analysis; `None` when it was unavailable
    pub analysis: Option<String>,
    /// Repositories the change touches
    pub affected_repositories: Vec<String>,
    /// Effort estimate
    pub complexity: Complexity,
}

/// Result of splitting a feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitOutcome {
    /// Feature that was split
    pub feature_id: u64,
    /// New story ids
    pub story_ids: Vec<u64>,
    /// Suggested breakdown, if the reasoning service answered
    pub suggestions: Option<String>,
    /// Stories whose description was filled from the suggestions
    pub updated_story_ids: Vec<u64>,
}

/// Requirements agent
pub struct RequirementsFlow {
    ctx: AgentContext,
    work_items: Arc<dyn WorkItemService>,
    retry: RetryConfig,
}

impl RequirementsFlow {
    /// New flow
    pub fn new(
        memory: Memory,
        llm: Arc<dyn LlmProvider>,
        work_items: Arc<dyn WorkItemService>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            ctx: AgentContext::new(REQUIREMENTS_AGENT_ID, SYSTEM_PROMPT, memory, llm),
            work_items,
            retry,
        }
    }

    /// Agent context
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Fetch a work item, retrying transient failures
    pub async fn fetch(&self, id: u64) -> Result<WorkItem> {
        call_with_backoff(&self.retry, || self.work_items.get(id)).await
    }

    /// Analyze `item` and pick the affected repositories among `bound`.
    ///
    /// Never fails: without an analysis every bound repository is affected.
    pub async fn analyze(&self, item: &WorkItem, bound: &[RepositoryBinding]) -> Requirements {
        self.ctx
            .observe(
                format!("Analyzing work item {}: {}", item.id, item.title),
                metadata!("work_item_id" => item.id),
            )
            .await;

        let repositories = bound
            .iter()
            .map(|r| {
                if r.description.is_empty() {
                    format!("- {}", r.name)
                } else {
                    format!("- {}: {}", r.name, r.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Analyze these requirements in detail.\n\n\
             Type: {item_type}\nTitle: {title}\nDescription:\n{description}\n\n\
             Acceptance criteria:\n{criteria}\n\n\
             Candidate repositories:\n{repositories}\n\n\
             Provide technical requirements, the affected repositories (by name), \
             data model and API changes, test scenarios, ambiguities, every assumption \
             you make, missing information and risks.",
            item_type = item.item_type,
            title = item.title,
            description = item.description,
            criteria = if item.acceptance_criteria.is_empty() {
                "Not specified"
            } else {
                item.acceptance_criteria.as_str()
            },
        );

        let analysis = match self.ctx.think(&prompt).await {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!(work_item_id = item.id, error = %e, "Analysis unavailable, assuming every bound repository");
                None
            }
        };

        let affected_repositories = affected_repositories(analysis.as_deref(), bound);
        let complexity = analysis
            .as_deref()
            .map(Complexity::estimate)
            .unwrap_or(Complexity::Low);
        let requirements = Requirements {
            work_item_id: item.id,
            title: item.title.clone(),
            analysis,
            affected_repositories,
            complexity,
        };

        let mut snapshot_metadata = Metadata::new();
        snapshot_metadata.insert(
            "affected_repositories".to_string(),
            json!(requirements.affected_repositories),
        );
        snapshot_metadata.insert("complexity".to_string(), json!(requirements.complexity));
        if let Some(analysis) = &requirements.analysis {
            snapshot_metadata.insert("analysis".to_string(), json!(analysis));
        }
        self.ctx
            .memory()
            .track_work_item(WorkItemSnapshot {
                work_item_id: item.id,
                timestamp: conveyor_memory::types::timestamp_now(),
                item_type: item.item_type.clone(),
                title: item.title.clone(),
                description: item.description.clone(),
                state: "Analyzed".to_string(),
                assigned_agent: Some(REQUIREMENTS_AGENT_ID.to_string()),
                metadata: snapshot_metadata,
            })
            .await;

        self.ctx
            .record_result(
                format!(
                    "Analyzed work item {}: {} repositories, complexity {}",
                    item.id,
                    requirements.affected_repositories.len(),
                    requirements.complexity
                ),
                true,
                metadata!(
                    "work_item_id" => item.id,
                    "affected_repositories" => &requirements.affected_repositories,
                ),
            )
            .await;
        requirements
    }

    /// Generate clarifying questions for `ambiguities`
    pub async fn clarify(&self, item: &WorkItem, ambiguities: &[String]) -> Result<String> {
        let listed = ambiguities
            .iter()
            .map(|a| format!("- {a}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Based on this work item, generate clarifying questions.\n\n\
             Title: {}\nDescription: {}\n\nIdentified ambiguities:\n{listed}\n\n\
             Focus on technical details needed for implementation.",
            item.title, item.description
        );
        self.ctx.think(&prompt).await
    }

    /// Split a feature into `story_count` child stories.
    pub async fn split_feature(&self, feature_id: u64, story_count: u32) -> Result<SplitOutcome> {
        let feature = self.fetch(feature_id).await?;
        self.ctx
            .observe(
                format!("Splitting feature {feature_id} into {story_count} stories"),
                metadata!("feature_id" => feature_id, "story_count" => story_count),
            )
            .await;

        let prompt = format!(
            "Split this feature into {story_count} user stories.\n\n\
             Title: {}\nDescription: {}\n\n\
             Write one section per story, each starting with a line `Story N: <title>`, \
             followed by its description, acceptance criteria and dependencies.",
            feature.title, feature.description
        );
        let suggestions = match self.ctx.think(&prompt).await {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!(feature_id, error = %e, "No split suggestions, creating stories without them");
                None
            }
        };

        self.ctx
            .decide(
                format!("Creating {story_count} stories under feature {feature_id}"),
                metadata!("feature_id" => feature_id),
            )
            .await;
        let story_ids =
            call_with_backoff(&self.retry, || self.work_items.split(feature_id, story_count))
                .await?;
        info!(feature_id, stories = story_ids.len(), "Feature split");

        let mut updated_story_ids = Vec::new();
        if let Some(text) = &suggestions {
            for (story_id, section) in story_ids.iter().zip(parse_story_sections(text)) {
                let mut fields = Fields::new();
                fields.insert("System.Description".to_string(), json!(section));
                match self.work_items.update(*story_id, &fields).await {
                    Ok(()) => updated_story_ids.push(*story_id),
                    Err(e) => warn!(story_id, error = %e, "Could not update story description"),
                }
            }
        }

        self.ctx
            .record_result(
                format!("Split feature {feature_id} into {} stories", story_ids.len()),
                true,
                metadata!("feature_id" => feature_id, "story_ids" => &story_ids),
            )
            .await;
        Ok(SplitOutcome {
            feature_id,
            story_ids,
            suggestions,
            updated_story_ids,
        })
    }
}

/// Bound repositories named in `analysis` (whole-word, case-insensitive);
/// all of them when none is named or there is no analysis.
fn affected_repositories(analysis: Option<&str>, bound: &[RepositoryBinding]) -> Vec<String> {
    let all = || bound.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
    let Some(analysis) = analysis else {
        return all();
    };
    let mentioned: Vec<String> = bound
        .iter()
        .filter(|r| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&r.name)))
                .map(|re| re.is_match(analysis))
                .unwrap_or(false)
        })
        .map(|r| r.name.clone())
        .collect();
    if mentioned.is_empty() {
        all()
    } else {
        mentioned
    }
}

/// Split a suggestion into `Story N` sections, in order.
pub fn parse_story_sections(text: &str) -> Vec<String> {
    let starts: Vec<usize> = STORY_HEADING.find_iter(text).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            text[*start..end].trim().to_string()
        })
        .filter(|section| !section.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockWorkItemService;
    use conveyor_llm::mock::ScriptedProvider;
    use mockall::predicate::eq;

    fn bound() -> Vec<RepositoryBinding> {
        vec![
            RepositoryBinding::new("backend", "https://example.com/backend.git"),
            RepositoryBinding::new("api", "https://example.com/api.git"),
            RepositoryBinding::new("frontend", "https://example.com/frontend.git"),
        ]
    }

    fn flow(llm: ScriptedProvider, work_items: MockWorkItemService) -> (RequirementsFlow, Memory) {
        let memory = Memory::in_memory();
        let flow = RequirementsFlow::new(
            memory.clone(),
            Arc::new(llm),
            Arc::new(work_items),
            RetryConfig::immediate(2),
        );
        (flow, memory)
    }

    #[test]
    fn test_complexity_estimate() {
        assert_eq!(Complexity::estimate("simple change"), Complexity::Low);
        assert_eq!(Complexity::estimate("needs a Migration"), Complexity::Medium);
        assert_eq!(
            Complexity::estimate("complex integration across multiple services"),
            Complexity::VeryHigh
        );
        assert_eq!(serde_json::to_value(Complexity::VeryHigh).unwrap(), json!("Very High"));
    }

    #[test]
    fn test_affected_repositories_match_whole_words() {
        let found = affected_repositories(Some("Changes in the API layer and Backend."), &bound());
        assert_eq!(found, vec!["backend", "api"]);
        // "rapid" contains "api" but is not a mention
        let found = affected_repositories(Some("rapid prototyping"), &bound());
        assert_eq!(found.len(), 3);
        assert_eq!(affected_repositories(None, &bound()).len(), 3);
    }

    #[test]
    fn test_parse_story_sections() {
        let text = "Plan:\nStory 1: Login form\nBuild the form.\n\n## Story 2: Session handling\nKeep users signed in.\n**Story 3** Logout";
        let sections = parse_story_sections(text);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0], "Story 1: Login form\nBuild the form.");
        assert!(sections[1].starts_with("## Story 2"));
        assert!(parse_story_sections("no headings here").is_empty());
    }

    #[tokio::test]
    async fn test_analyze_stores_snapshot() {
        let llm = ScriptedProvider::new().then_answer("Update the frontend only. Multiple screens.");
        let (flow, memory) = flow(llm, MockWorkItemService::new());
        let item = WorkItem::new(42, "User Story", "Dark mode");

        let requirements = flow.analyze(&item, &bound()).await;

        assert_eq!(requirements.affected_repositories, vec!["frontend"]);
        assert_eq!(requirements.complexity, Complexity::Medium);
        let snapshot = memory.work_item(42).await.unwrap();
        assert_eq!(snapshot.state, "Analyzed");
        assert_eq!(snapshot.metadata["affected_repositories"], json!(["frontend"]));
    }

    #[tokio::test]
    async fn test_analyze_without_llm_uses_all_bound() {
        let llm = ScriptedProvider::new().then_fail("offline");
        let (flow, _) = flow(llm, MockWorkItemService::new());
        let requirements = flow.analyze(&WorkItem::new(1, "User Story", "x"), &bound()).await;
        assert!(requirements.analysis.is_none());
        assert_eq!(requirements.affected_repositories.len(), 3);
    }

    #[tokio::test]
    async fn test_split_feature_updates_new_stories() {
        let mut work_items = MockWorkItemService::new();
        work_items
            .expect_get()
            .with(eq(7))
            .returning(|id| Ok(WorkItem::new(id, "Feature", "Checkout")));
        work_items
            .expect_split()
            .with(eq(7), eq(2))
            .times(1)
            .returning(|_, _| Ok(vec![70, 71]));
        work_items
            .expect_update()
            .times(2)
            .returning(|_, _| Ok(()));
        let llm = ScriptedProvider::new()
            .then_answer("Story 1: Cart\nAdd items.\nStory 2: Payment\nPay for items.");
        let (flow, _) = flow(llm, work_items);

        let outcome = flow.split_feature(7, 2).await.unwrap();

        assert_eq!(outcome.story_ids, vec![70, 71]);
        assert_eq!(outcome.updated_story_ids, vec![70, 71]);
    }

    #[tokio::test]
    async fn test_split_feature_retries_unavailable_tracker() {
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut work_items = MockWorkItemService::new();
        work_items
            .expect_get()
            .returning(|id| Ok(WorkItem::new(id, "Feature", "Checkout")));
        let counter = attempts.clone();
        work_items.expect_split().returning(move |_, _| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(crate::Error::unavailable("azure-devops", "503 Service Unavailable"))
            } else {
                Ok(vec![80, 81, 82])
            }
        });
        let (flow, _) = flow(ScriptedProvider::new(), work_items);

        let outcome = flow.split_feature(8, 3).await.unwrap();

        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(outcome.story_ids, vec![80, 81, 82]);
        assert!(outcome.updated_story_ids.is_empty());
    }

    #[tokio::test]
    async fn test_split_feature_missing_feature_fails_before_split() {
        let mut work_items = MockWorkItemService::new();
        work_items.expect_get().returning(|id| {
            Err(crate::Error::NotFound {
                service: "work-items".into(),
                resource: format!("work item {id}"),
            })
        });
        work_items.expect_split().never();
        let (flow, _) = flow(ScriptedProvider::new(), work_items);

        assert!(flow.split_feature(9, 3).await.is_err());
    }
}
