//! Task dispatch: validate, delegate, aggregate

use super::core::Orchestrator;
use super::types::{
    SubTask, SubTaskDetail, SubTaskFailure, TaskExecution, TaskParameters, TaskStatus, TaskType,
};
use super::validation::{validate, ValidatedTask};
use crate::agent::metadata;
use crate::build_monitor::{BuildReport, TrackRequest};
use crate::collaborators::WorkItem;
use crate::error::{Error, Result, UserFriendlyError};
use crate::flows::{checkpoint, ReleaseOutcome, Requirements};
use crate::repository::RepositoryBinding;
use crate::utils::call_with_backoff;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Failure class of release components without a succeeded build
pub const RELEASE_BLOCKED: &str = "release-blocked";

impl Orchestrator {
    /// Dispatch a task and wait for every sub-task to finish.
    ///
    /// Invalid parameters fail with [`Error::Validation`] before any
    /// collaborator is contacted. Everything after that is reported in the
    /// returned execution.
    pub async fn dispatch(
        &self,
        task_type: TaskType,
        parameters: TaskParameters,
    ) -> Result<TaskExecution> {
        self.dispatch_with_token(task_type, parameters, CancellationToken::new())
            .await
    }

    /// [`Orchestrator::dispatch`], also stopping when `cancel` fires
    #[instrument(skip_all, fields(task_type = %task_type))]
    pub async fn dispatch_with_token(
        &self,
        task_type: TaskType,
        parameters: TaskParameters,
        cancel: CancellationToken,
    ) -> Result<TaskExecution> {
        let validated = match validate(task_type, &parameters, &self.catalog) {
            Ok(validated) => validated,
            Err(e) => {
                warn!(error = %e, "Rejected task");
                self.ctx
                    .record_result(
                        format!("Rejected {task_type}: {}", e.user_message()),
                        false,
                        metadata!("task_type" => task_type, "failure_class" => e.failure_label()),
                    )
                    .await;
                return Err(e);
            }
        };

        let mut execution = TaskExecution::new(task_type, parameters);
        execution.status = TaskStatus::Running;
        let task_id = execution.task_id;
        self.executions.insert(task_id, execution.clone());

        let token = self.shutdown.child_token();
        self.active_executions.insert(task_id, token.clone());
        let link = link_cancellation(&cancel, &token);

        self.ctx
            .observe(
                format!("Dispatching {task_type} task {task_id}"),
                metadata!("task_id" => task_id.to_string(), "parameters" => &execution.parameters),
            )
            .await;

        match validated {
            ValidatedTask::ImplementStory {
                story_id,
                repositories,
            } => {
                self.implement_story(&mut execution, story_id, repositories, &token)
                    .await
            }
            ValidatedTask::SplitFeature {
                feature_id,
                story_count,
            } => {
                self.split_feature(&mut execution, feature_id, story_count, &token)
                    .await
            }
            ValidatedTask::CreateRelease {
                components,
                source_branch,
                release_name,
            } => {
                self.create_release(
                    &mut execution,
                    &components,
                    &source_branch,
                    release_name.as_deref(),
                    &token,
                )
                .await
            }
        }

        link.abort();
        self.active_executions.remove(&task_id);
        self.keep_finished(execution.clone());

        info!(
            task_id = %task_id,
            status = %execution.status,
            sub_tasks = execution.sub_tasks.len(),
            "Task finished"
        );
        self.ctx
            .record_result(
                format!("{task_type} task {task_id} finished: {}", execution.status),
                execution.status == TaskStatus::Succeeded,
                metadata!(
                    "task_id" => task_id.to_string(),
                    "status" => execution.status,
                    "failed_targets" => execution.failed_targets(),
                ),
            )
            .await;
        Ok(execution)
    }

    async fn implement_story(
        &self,
        execution: &mut TaskExecution,
        story_id: u64,
        repositories: Vec<RepositoryBinding>,
        cancel: &CancellationToken,
    ) {
        if let Err(e) = checkpoint(cancel) {
            execution.reject(&e);
            return;
        }
        let story = match self.requirements.fetch(story_id).await {
            Ok(story) => story,
            Err(e) => {
                warn!(story_id, error = %e, "Story unavailable");
                execution.reject(&e);
                return;
            }
        };

        let requirements = self.requirements.analyze(&story, &repositories).await;
        let targets: Vec<RepositoryBinding> = repositories
            .into_iter()
            .filter(|r| requirements.affected_repositories.contains(&r.name))
            .collect();
        if targets.is_empty() {
            execution.reject(&Error::validation(
                "repositories",
                "no affected repository among the requested ones",
            ));
            return;
        }

        self.ctx
            .decide(
                format!(
                    "Delegating story {story_id} to {}",
                    targets
                        .iter()
                        .map(|r| r.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                metadata!("story_id" => story_id, "complexity" => requirements.complexity),
            )
            .await;
        self.publish_pending(execution, targets.iter().map(|r| r.name.clone()));

        let parallel = self.settings.max_parallel_repos.max(1);
        let sub_tasks: Vec<SubTask> = stream::iter(targets)
            .map(|repo| self.change_sub_task(repo, &story, &requirements, cancel))
            .buffered(parallel)
            .collect()
            .await;
        execution.complete(sub_tasks);
    }

    async fn change_sub_task(
        &self,
        repo: RepositoryBinding,
        story: &WorkItem,
        requirements: &Requirements,
        cancel: &CancellationToken,
    ) -> SubTask {
        let sub_task = SubTask::new(&repo.name);
        let Some(flow) = self.code_flows.get(&repo.name) else {
            let error = Error::NotFound {
                service: "code_flows".to_string(),
                resource: repo.name.clone(),
            };
            return sub_task.fail(&error, None);
        };
        let report = flow.implement(story, requirements, cancel).await;
        match report.failure {
            None => sub_task.succeed(SubTaskDetail::Change(report.outcome)),
            Some(e) => sub_task.fail(&e, Some(SubTaskDetail::Change(report.outcome))),
        }
    }

    async fn split_feature(
        &self,
        execution: &mut TaskExecution,
        feature_id: u64,
        story_count: u32,
        cancel: &CancellationToken,
    ) {
        if let Err(e) = checkpoint(cancel) {
            execution.reject(&e);
            return;
        }
        let target = format!("feature:{feature_id}");
        self.publish_pending(execution, [target.clone()]);
        let sub_task = SubTask::new(target);
        let sub_task = match self.requirements.split_feature(feature_id, story_count).await {
            Ok(outcome) => sub_task.succeed(SubTaskDetail::Split(outcome)),
            Err(e) => sub_task.fail(&e, None),
        };
        execution.complete(vec![sub_task]);
    }

    async fn create_release(
        &self,
        execution: &mut TaskExecution,
        components: &[RepositoryBinding],
        source_branch: &str,
        release_name: Option<&str>,
        cancel: &CancellationToken,
    ) {
        if let Err(e) = checkpoint(cancel) {
            execution.reject(&e);
            return;
        }
        let attempt = self
            .release
            .create_release(components, source_branch, release_name)
            .await;

        let mut sub_tasks: Vec<SubTask> = attempt
            .readiness
            .components
            .iter()
            .map(|verdict| {
                let detail = SubTaskDetail::Readiness {
                    build_id: verdict.build_id,
                    state: verdict.state.clone(),
                    issues: verdict.issues.clone(),
                };
                let sub_task = SubTask::new(&verdict.component);
                if verdict.ready {
                    sub_task.succeed(detail)
                } else {
                    sub_task.fail_with(
                        SubTaskFailure::new(RELEASE_BLOCKED, verdict.issues.join("; ")),
                        Some(detail),
                    )
                }
            })
            .collect();

        let release = SubTask::new("release");
        sub_tasks.push(match attempt.outcome {
            ReleaseOutcome::Created(plan) => release.succeed(SubTaskDetail::Release(plan)),
            ReleaseOutcome::Blocked { blocking } => release.fail_with(
                SubTaskFailure::new(
                    RELEASE_BLOCKED,
                    format!("blocked by {}", blocking.join(", ")),
                ),
                None,
            ),
            ReleaseOutcome::Failed(e) => release.fail(&e, None),
        });
        execution.complete(sub_tasks);
    }

    /// Track an existing CI build to a terminal state.
    ///
    /// The repository is looked up by build definition when not given.
    pub async fn monitor_build(
        &self,
        build_id: u64,
        repository: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BuildReport> {
        let retry = self.settings.retry_config();
        let info = call_with_backoff(&retry, || self.builds.get(build_id))
            .await?
            .ok_or_else(|| Error::NotFound {
                service: "builds".to_string(),
                resource: format!("build {build_id}"),
            })?;
        let repository = match repository {
            Some(name) => name.to_string(),
            None => self
                .catalog
                .repositories
                .iter()
                .find(|r| r.build_definition.as_deref() == Some(info.definition.as_str()))
                .map(|r| r.name.clone())
                .unwrap_or_else(|| info.definition.clone()),
        };
        let token = self.shutdown.child_token();
        let link = link_cancellation(cancel, &token);
        let report = self
            .monitor
            .track(
                TrackRequest::new(build_id, repository, &info.definition, &info.branch),
                &token,
            )
            .await;
        link.abort();
        Ok(report)
    }

    /// Expose pending sub-tasks of a running execution to readers.
    fn publish_pending(
        &self,
        execution: &mut TaskExecution,
        targets: impl IntoIterator<Item = String>,
    ) {
        execution.sub_tasks = targets.into_iter().map(SubTask::new).collect();
        self.executions.insert(execution.task_id, execution.clone());
    }
}

/// Cancel `token` when `caller` fires. Abort the handle once done.
fn link_cancellation(caller: &CancellationToken, token: &CancellationToken) -> JoinHandle<()> {
    if caller.is_cancelled() {
        token.cancel();
    }
    let caller = caller.clone();
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = caller.cancelled() => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}
