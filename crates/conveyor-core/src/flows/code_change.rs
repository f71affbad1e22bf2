//! Per-repository code change flow

use super::checkpoint;
use super::requirements::Requirements;
use crate::agent::{metadata, AgentContext};
use crate::build_monitor::{
    BuildMonitor, BuildSummary, EscalationRequest, FailureClass, TrackRequest,
};
use crate::collaborators::{
    BuildService, BuildTool, GitService, LocalBuildResult, PullRequest, PullRequestRequest,
    WorkItem,
};
use crate::error::{Error, Result, UserFriendlyError};
use crate::repository::RepositoryBinding;
use crate::utils::text::{slugify, truncate};
use crate::utils::{call_with_backoff, RetryConfig};
use conveyor_llm::LlmProvider;
use conveyor_memory::{ActionRecord, Memory};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const SYSTEM_PROMPT: &str = "You are a Code agent responsible for one repository. \
You plan focused changes for work items, follow the existing conventions of the codebase, \
keep tests passing and flag conflicting or ambiguous requirements instead of guessing.";

const MAX_FIX_ERROR_LINES: usize = 10;

/// What a code change produced, as far as it got
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeOutcome {
    /// Repository name
    pub repository: String,
    /// Feature branch
    pub branch: Option<String>,
    /// Implementation plan from the reasoning service
    pub plan: Option<String>,
    /// Local build tool result
    pub local_build: Option<LocalBuildResult>,
    /// Pushed commit
    pub commit: Option<String>,
    /// Opened pull request
    pub pull_request: Option<PullRequest>,
    /// Final state of the tracked CI build
    pub build: Option<BuildSummary>,
}

/// A change outcome plus the error that stopped it, if any
#[derive(Debug)]
pub struct ChangeReport {
    /// What was produced
    pub outcome: ChangeOutcome,
    /// Why it did not finish
    pub failure: Option<Error>,
}

impl ChangeReport {
    /// Whether the change finished with a pull request and a green build
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Fix plan produced for an escalated build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixPlan {
    /// Repository
    pub repository: String,
    /// Escalated build
    pub build_id: u64,
    /// Failure class
    pub failure_class: FailureClass,
    /// Error lines the plan was based on
    pub errors: Vec<String>,
    /// Plan text
    pub plan: String,
}

/// Code agent for one repository
pub struct CodeChangeFlow {
    ctx: AgentContext,
    repo: RepositoryBinding,
    git: Arc<dyn GitService>,
    builds: Arc<dyn BuildService>,
    build_tool: Option<Arc<dyn BuildTool>>,
    monitor: Arc<BuildMonitor>,
    retry: RetryConfig,
}

impl CodeChangeFlow {
    /// Agent id for `repository`
    pub fn agent_id(repository: &str) -> String {
        format!("code_repo_{repository}")
    }

    /// New flow for `repo`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: RepositoryBinding,
        memory: Memory,
        llm: Arc<dyn LlmProvider>,
        git: Arc<dyn GitService>,
        builds: Arc<dyn BuildService>,
        build_tool: Option<Arc<dyn BuildTool>>,
        monitor: Arc<BuildMonitor>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            ctx: AgentContext::new(Self::agent_id(&repo.name), SYSTEM_PROMPT, memory, llm),
            repo,
            git,
            builds,
            build_tool,
            monitor,
            retry,
        }
    }

    /// Repository binding
    pub fn repository(&self) -> &RepositoryBinding {
        &self.repo
    }

    /// Agent context
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Feature branch name for a story
    pub fn branch_name(story: &WorkItem) -> String {
        let slug = slugify(&story.title, 30);
        if slug.is_empty() {
            format!("feature/{}", story.id)
        } else {
            format!("feature/{}-{slug}", story.id)
        }
    }

    /// Implement `story` in this repository.
    ///
    /// Collaborator failures end the change early; whatever was produced
    /// before the failure stays in the outcome.
    #[instrument(skip_all, fields(repository = %self.repo.name, story_id = story.id))]
    pub async fn implement(
        &self,
        story: &WorkItem,
        requirements: &Requirements,
        cancel: &CancellationToken,
    ) -> ChangeReport {
        let mut outcome = ChangeOutcome {
            repository: self.repo.name.clone(),
            ..Default::default()
        };
        let failure = self
            .run(story, requirements, cancel, &mut outcome)
            .await
            .err();

        match &failure {
            None => {
                info!("Change complete");
                self.ctx
                    .record_result(
                        format!("Implemented work item {} in {}", story.id, self.repo.name),
                        true,
                        metadata!(
                            "work_item_id" => story.id,
                            "branch" => &outcome.branch,
                            "pull_request" => outcome.pull_request.as_ref().map(|pr| pr.id),
                        ),
                    )
                    .await;
            }
            Some(e) => {
                warn!(error = %e, "Change failed");
                self.ctx
                    .record_result(
                        format!(
                            "Work item {} in {} failed: {}",
                            story.id,
                            self.repo.name,
                            e.user_message()
                        ),
                        false,
                        metadata!(
                            "work_item_id" => story.id,
                            "failure_class" => e.failure_label(),
                            "branch" => &outcome.branch,
                        ),
                    )
                    .await;
            }
        }
        ChangeReport { outcome, failure }
    }

    async fn run(
        &self,
        story: &WorkItem,
        requirements: &Requirements,
        cancel: &CancellationToken,
        outcome: &mut ChangeOutcome,
    ) -> Result<()> {
        self.ctx
            .observe(
                format!("Implementing work item {} in {}", story.id, self.repo.name),
                metadata!("work_item_id" => story.id),
            )
            .await;

        checkpoint(cancel)?;
        let workdir = call_with_backoff(&self.retry, || self.git.clone_or_update(&self.repo)).await?;

        outcome.plan = self.plan(story, requirements, &workdir).await;

        checkpoint(cancel)?;
        let branch = Self::branch_name(story);
        self.ctx
            .decide(
                format!("Creating branch {branch}"),
                metadata!("work_item_id" => story.id, "branch" => &branch),
            )
            .await;
        call_with_backoff(&self.retry, || self.git.create_branch(&self.repo, &branch)).await?;
        outcome.branch = Some(branch.clone());
        self.action("create_branch", &branch, json!({ "work_item_id": story.id }))
            .await;

        if let Some(tool) = &self.build_tool {
            checkpoint(cancel)?;
            let result = call_with_backoff(&self.retry, || tool.run(&self.repo, &workdir)).await?;
            let success = result.success;
            let exit_code = result.exit_code;
            outcome.local_build = Some(result);
            if !success {
                return Err(Error::LocalBuildFailed {
                    repository: self.repo.name.clone(),
                    exit_code,
                });
            }
        }

        checkpoint(cancel)?;
        let message = format!("Implement {}\n\nWork item: #{}", story.title, story.id);
        let commit = call_with_backoff(&self.retry, || {
            self.git.commit_and_push(&self.repo, &branch, &message)
        })
        .await?;
        outcome.commit = Some(commit.clone());
        self.action("commit_and_push", &branch, json!({ "commit": commit }))
            .await;

        checkpoint(cancel)?;
        let description = format!(
            "Implements work item #{}\n\n{}",
            story.id,
            truncate(outcome.plan.as_deref().unwrap_or(&story.description), 500)
        );
        let request = PullRequestRequest {
            source_branch: branch.clone(),
            target_branch: self.repo.default_branch.clone(),
            title: format!("[{}] {}", story.id, story.title),
            description,
            work_item_ids: vec![story.id],
        };
        let pull_request = call_with_backoff(&self.retry, || {
            self.git.create_pull_request(&self.repo, &request)
        })
        .await?;
        self.action(
            "create_pull_request",
            &branch,
            json!({ "pull_request_id": pull_request.id, "url": pull_request.url }),
        )
        .await;
        outcome.pull_request = Some(pull_request);

        let Some(definition) = &self.repo.build_definition else {
            return Ok(());
        };
        checkpoint(cancel)?;
        let build_id =
            call_with_backoff(&self.retry, || self.builds.queue(definition, &branch)).await?;
        let report = self
            .monitor
            .track(
                TrackRequest::new(build_id, &self.repo.name, definition, &branch),
                cancel,
            )
            .await;
        outcome.build = Some(report.summary());
        match report.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn plan(&self, story: &WorkItem, requirements: &Requirements, workdir: &Path) -> Option<String> {
        let prompt = format!(
            "Create an implementation plan for this work item in repository {repo}.\n\n\
             Work item: {title}\nDescription: {description}\nRequirements: {analysis}\n\
             Checkout: {workdir}\n\n\
             List the files to create or modify, the code changes, the tests to add and any \
             dependency changes. Flag conflicting or ambiguous requirements explicitly.",
            repo = self.repo.name,
            title = story.title,
            description = story.description,
            analysis = requirements.analysis.as_deref().unwrap_or("See description"),
            workdir = workdir.display(),
        );
        match self.ctx.think(&prompt).await {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!(error = %e, "No implementation plan, continuing without one");
                None
            }
        }
    }

    async fn action(&self, action_type: &str, target: &str, result: serde_json::Value) {
        self.ctx
            .record_action(ActionRecord::new(self.ctx.agent_id(), action_type, target).with_result(result))
            .await;
    }

    /// Produce a fix plan for an escalated build of this repository
    pub async fn fix_build(&self, request: &EscalationRequest) -> Result<FixPlan> {
        let started = Instant::now();
        let errors = error_lines(&request.logs_excerpt);
        self.ctx
            .observe(
                format!(
                    "Fixing build {} ({}): {} error lines",
                    request.build_id,
                    request.failure_class,
                    errors.len()
                ),
                metadata!("build_id" => request.build_id, "failure_class" => request.failure_class),
            )
            .await;

        let prompt = format!(
            "Analyze these build errors and suggest fixes.\n\n\
             Repository: {repo}\nBranch: {branch}\nFailure class: {class}\n\n\
             Errors:\n{errors}\n\n\
             Give the root cause of each error, the specific code changes and the files to modify.",
            repo = self.repo.name,
            branch = request.branch,
            class = request.failure_class,
            errors = if errors.is_empty() {
                "(no error lines in the log excerpt)".to_string()
            } else {
                errors.join("\n")
            },
        );
        let result = self.ctx.think(&prompt).await;

        let record = ActionRecord::new(
            self.ctx.agent_id(),
            "fix_build",
            format!("build:{}", request.build_id),
        )
        .with_parameters(json!({
            "failure_class": request.failure_class,
            "logs_ref": request.logs_ref,
        }))
        .with_duration(started.elapsed());

        match result {
            Ok(plan) => {
                self.ctx
                    .record_action(record.with_result(json!({ "plan": truncate(&plan, 200) })))
                    .await;
                Ok(FixPlan {
                    repository: self.repo.name.clone(),
                    build_id: request.build_id,
                    failure_class: request.failure_class,
                    errors,
                    plan,
                })
            }
            Err(e) => {
                self.ctx
                    .record_action(
                        record
                            .with_result(json!({ "error": e.to_string() }))
                            .with_success(false),
                    )
                    .await;
                Err(e)
            }
        }
    }
}

/// Up to ten log lines that look like errors; the last lines otherwise.
fn error_lines(logs: &str) -> Vec<String> {
    let errors: Vec<String> = logs
        .lines()
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("error") || lower.contains("fail")
        })
        .take(MAX_FIX_ERROR_LINES)
        .map(|line| line.trim().to_string())
        .collect();
    if !errors.is_empty() {
        return errors;
    }
    let lines: Vec<&str> = logs.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(MAX_FIX_ERROR_LINES)..]
        .iter()
        .map(|l| l.trim().to_string())
        .collect()
}
