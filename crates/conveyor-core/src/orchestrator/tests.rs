use super::core::evict_finished;
use super::*;
use crate::build_monitor::{BuildState, BuildSummary, FailureClass};
use crate::collaborators::{
    BuildStatus, MockGitService, MockWorkItemService, PullRequest, WorkItem,
};
use crate::config::{AgentSettings, RetrySettings};
use crate::error::Error;
use crate::repository::{RepositoryBinding, RepositoryCatalog};
use crate::testing::{fast_settings, FakeBuildService};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use conveyor_llm::mock::ScriptedProvider;
use conveyor_memory::{Memory, MemoryKind, RecentQuery};
use mockall::predicate::eq;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn settings() -> AgentSettings {
    AgentSettings {
        collaborator_retry: RetrySettings {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        },
        ..fast_settings()
    }
}

fn catalog() -> RepositoryCatalog {
    RepositoryCatalog::new(vec![
        RepositoryBinding::new("backend", "https://example.com/backend.git")
            .with_build_definition("backend-ci"),
        RepositoryBinding::new("frontend", "https://example.com/frontend.git")
            .with_build_definition("frontend-ci"),
        RepositoryBinding::new("api", "https://example.com/api.git"),
    ])
    .with_group("web", &["frontend", "backend"])
}

struct Harness {
    work_items: MockWorkItemService,
    git: MockGitService,
    builds: Arc<FakeBuildService>,
    llm: ScriptedProvider,
    memory: Memory,
}

impl Harness {
    fn new() -> Self {
        Self {
            work_items: MockWorkItemService::new(),
            git: MockGitService::new(),
            builds: Arc::new(FakeBuildService::new()),
            llm: ScriptedProvider::new(),
            memory: Memory::in_memory(),
        }
    }

    fn build(self) -> Orchestrator {
        let collaborators = Collaborators {
            work_items: Arc::new(self.work_items),
            builds: self.builds,
            git: Arc::new(self.git),
            llm: Arc::new(self.llm),
            build_tool: None,
        };
        Orchestrator::new(collaborators, self.memory, catalog(), settings())
    }
}

fn summary(repository: &str, state: BuildState, class: Option<FailureClass>) -> BuildSummary {
    BuildSummary {
        repository: repository.into(),
        build_id: 40,
        definition: format!("{repository}-ci"),
        branch: "main".into(),
        state,
        failure_class: class,
        retry_count: 0,
        finished_at: Utc::now(),
    }
}

#[test]
fn test_task_type_parsing() {
    assert_eq!("implement_story".parse::<TaskType>().unwrap(), TaskType::ImplementStory);
    assert_eq!("create-release".parse::<TaskType>().unwrap(), TaskType::CreateRelease);
    assert!("deploy".parse::<TaskType>().is_err());
    assert_eq!(
        serde_json::to_string(&TaskStatus::PartialFailure).unwrap(),
        "\"partial_failure\""
    );
}

#[test]
fn test_aggregation_rule() {
    let ok = SubTask::new("a").succeed(SubTaskDetail::Readiness {
        build_id: None,
        state: None,
        issues: vec![],
    });
    let failed = SubTask::new("b").fail(&Error::unavailable("git", "down"), None);
    let cancelled = SubTask::new("c").fail(&Error::Cancelled, None);

    assert_eq!(TaskStatus::aggregate(&[]), TaskStatus::Failed);
    assert_eq!(TaskStatus::aggregate(&[ok.clone()]), TaskStatus::Succeeded);
    assert_eq!(
        TaskStatus::aggregate(&[ok.clone(), failed.clone()]),
        TaskStatus::PartialFailure
    );
    assert_eq!(TaskStatus::aggregate(&[failed]), TaskStatus::PartialFailure);
    assert_eq!(cancelled.status, SubTaskStatus::Cancelled);
    assert_eq!(cancelled.failure.unwrap().class, "cancelled");
}

#[tokio::test]
async fn test_release_blocked_by_escalated_component() {
    let mut harness = Harness::new();
    harness.work_items.expect_create().never();
    let orchestrator = harness.build();
    let registry = orchestrator.monitor().registry();
    registry
        .archive(summary("backend", BuildState::Succeeded, None))
        .await;
    registry
        .archive(summary(
            "frontend",
            BuildState::Escalated,
            Some(FailureClass::TestFailure),
        ))
        .await;

    let execution = orchestrator
        .dispatch(
            TaskType::CreateRelease,
            TaskParameters::create_release(&["backend", "frontend"]),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, TaskStatus::PartialFailure);
    assert_eq!(execution.failed_targets(), vec!["frontend", "release"]);
    assert_eq!(
        execution.sub_task("backend").unwrap().status,
        SubTaskStatus::Succeeded
    );
    let frontend = execution.sub_task("frontend").unwrap();
    assert_eq!(frontend.failure.as_ref().unwrap().class, RELEASE_BLOCKED);
    let release = execution.sub_task("release").unwrap();
    assert!(release.failure.as_ref().unwrap().summary.contains("frontend"));
}

#[tokio::test]
async fn test_release_created_for_component_group() {
    let mut harness = Harness::new();
    harness
        .work_items
        .expect_create()
        .times(1)
        .returning(|_, _, _, _| Ok(501));
    harness.llm = ScriptedProvider::new().with_fallback("# Release Notes");
    let orchestrator = harness.build();
    for repo in ["backend", "frontend"] {
        orchestrator
            .monitor()
            .registry()
            .archive(summary(repo, BuildState::Succeeded, None))
            .await;
    }

    let execution = orchestrator
        .dispatch(
            TaskType::CreateRelease,
            TaskParameters::create_release(&["web"]).with_release_name("R-1.0"),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, TaskStatus::Succeeded);
    let Some(SubTaskDetail::Release(plan)) = &execution.sub_task("release").unwrap().detail else {
        panic!("release sub-task has no plan");
    };
    assert_eq!(plan.work_item_id, 501);
    assert_eq!(plan.branches[0].branch, "release/R-1.0/frontend");
}

#[tokio::test]
async fn test_implement_story_partial_failure() {
    let mut harness = Harness::new();
    harness
        .work_items
        .expect_get()
        .with(eq(12345))
        .returning(|id| {
            Ok(WorkItem::new(id, "User Story", "Add OAuth2 login")
                .with_description("Login with the corporate identity provider"))
        });
    harness.git.expect_clone_or_update().returning(|repo| {
        if repo.name == "api" {
            Err(Error::unavailable("git", "connection reset"))
        } else {
            Ok(PathBuf::from(format!("/tmp/work/{}", repo.name)))
        }
    });
    harness.git.expect_create_branch().returning(|_, _| Ok(()));
    harness
        .git
        .expect_commit_and_push()
        .returning(|_, _, _| Ok("c0ffee".to_string()));
    harness.git.expect_create_pull_request().returning(|repo, req| {
        Ok(PullRequest {
            id: 12,
            url: format!("https://dev.azure.com/acme/_git/{}/pullrequest/12", repo.name),
            source_branch: req.source_branch.clone(),
            target_branch: req.target_branch.clone(),
            title: req.title.clone(),
        })
    });
    harness.llm = ScriptedProvider::new().with_fallback("Changes are needed in backend and api.");
    let memory = harness.memory.clone();
    let orchestrator = harness.build();

    let execution = orchestrator
        .dispatch(
            TaskType::ImplementStory,
            TaskParameters::implement_story(12345, &["backend", "api"]),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, TaskStatus::PartialFailure);
    assert_eq!(execution.sub_tasks.len(), 2);
    let backend = execution.sub_task("backend").unwrap();
    assert_eq!(backend.status, SubTaskStatus::Succeeded);
    let Some(SubTaskDetail::Change(change)) = &backend.detail else {
        panic!("backend has no change outcome");
    };
    assert_eq!(change.pull_request.as_ref().unwrap().id, 12);
    assert_eq!(change.build.as_ref().unwrap().state, BuildState::Succeeded);

    let api = execution.sub_task("api").unwrap();
    assert_eq!(api.status, SubTaskStatus::Failed);
    assert_eq!(api.failure.as_ref().unwrap().class, "collaborator-unavailable");

    let snapshot = memory.work_item(12345).await.unwrap();
    assert_eq!(snapshot.state, "Analyzed");
    let results = memory
        .recent(
            &RecentQuery::new("code_repo_api")
                .kind(MemoryKind::Result)
                .limit(5),
        )
        .await;
    assert_eq!(results[0].metadata.get("success"), Some(&serde_json::json!(false)));
    assert_eq!(orchestrator.execution(execution.task_id), Some(execution));
}

#[tokio::test]
async fn test_story_fetch_failure_fails_task() {
    let mut harness = Harness::new();
    harness.work_items.expect_get().returning(|id| {
        Err(Error::NotFound {
            service: "work_items".into(),
            resource: format!("work item {id}"),
        })
    });
    harness.git.expect_clone_or_update().never();
    let orchestrator = harness.build();

    let execution = orchestrator
        .dispatch(
            TaskType::ImplementStory,
            TaskParameters::implement_story(404, &["backend"]),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, TaskStatus::Failed);
    assert!(execution.sub_tasks.is_empty());
    assert_eq!(execution.dispatch_error.unwrap().class, "collaborator-error");
}

#[tokio::test]
async fn test_validation_happens_before_any_call() {
    let mut harness = Harness::new();
    harness.work_items.expect_get().never();
    harness.work_items.expect_split().never();
    harness.git.expect_clone_or_update().never();
    let orchestrator = harness.build();

    let cases = [
        (TaskType::ImplementStory, TaskParameters::implement_story(1, &["mobile"])),
        (TaskType::SplitFeature, TaskParameters::split_feature(5, Some(0))),
        (TaskType::SplitFeature, TaskParameters::split_feature(5, Some(21))),
        (TaskType::CreateRelease, TaskParameters::create_release(&[])),
    ];
    for (task_type, params) in cases {
        let err = orchestrator.dispatch(task_type, params).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "{err:?}");
    }
    assert!(orchestrator.executions().is_empty());
}

#[tokio::test]
async fn test_split_feature_single_sub_task() {
    let mut harness = Harness::new();
    harness
        .work_items
        .expect_get()
        .with(eq(77))
        .returning(|id| Ok(WorkItem::new(id, "Feature", "Self-service onboarding")));
    harness
        .work_items
        .expect_split()
        .with(eq(77), eq(2))
        .times(1)
        .returning(|_, _| Ok(vec![78, 79]));
    harness.work_items.expect_update().times(2).returning(|_, _| Ok(()));
    harness.llm = ScriptedProvider::new()
        .then_answer("Story 1: Sign up\nForm and validation.\nStory 2: Verify email\nSend a link.");
    let orchestrator = harness.build();

    let execution = orchestrator
        .dispatch(TaskType::SplitFeature, TaskParameters::split_feature(77, Some(2)))
        .await
        .unwrap();

    assert_eq!(execution.status, TaskStatus::Succeeded);
    let sub_task = execution.sub_task("feature:77").unwrap();
    let Some(SubTaskDetail::Split(outcome)) = &sub_task.detail else {
        panic!("no split outcome");
    };
    assert_eq!(outcome.story_ids, vec![78, 79]);
    assert_eq!(outcome.updated_story_ids, vec![78, 79]);
}

#[tokio::test]
async fn test_cancelled_dispatch_has_no_side_effects() {
    let mut harness = Harness::new();
    harness.work_items.expect_get().never();
    harness.git.expect_clone_or_update().never();
    let orchestrator = harness.build();
    let caller = CancellationToken::new();
    caller.cancel();

    let execution = orchestrator
        .dispatch_with_token(
            TaskType::ImplementStory,
            TaskParameters::implement_story(12345, &["backend"]),
            caller,
        )
        .await
        .unwrap();

    assert_eq!(execution.status, TaskStatus::Failed);
    assert_eq!(execution.dispatch_error.unwrap().class, "cancelled");
    assert_eq!(orchestrator.active_execution_count(), 0);

    orchestrator.shutdown();
    assert!(orchestrator.is_shut_down());
    assert!(orchestrator.cancel_token().is_cancelled());
    let execution = orchestrator
        .dispatch(
            TaskType::SplitFeature,
            TaskParameters::split_feature(5, None),
        )
        .await
        .unwrap();
    assert_eq!(execution.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_cancel_stops_in_flight_but_not_later_dispatches() {
    let mut harness = Harness::new();
    harness
        .work_items
        .expect_get()
        .with(eq(77))
        .returning(|id| Ok(WorkItem::new(id, "Feature", "Self-service onboarding")));
    harness
        .work_items
        .expect_split()
        .times(1)
        .returning(|_, _| Ok(vec![78]));
    harness.work_items.expect_update().returning(|_, _| Ok(()));
    harness.llm = ScriptedProvider::new().then_answer("Story 1: Sign up\nForm and validation.");
    let orchestrator = harness.build();

    let in_flight = orchestrator.cancel_token();
    orchestrator
        .active_executions
        .insert(uuid::Uuid::new_v4(), in_flight.clone());
    orchestrator.cancel();
    assert!(in_flight.is_cancelled());
    assert!(!orchestrator.is_shut_down());
    orchestrator.active_executions.clear();

    let execution = orchestrator
        .dispatch(TaskType::SplitFeature, TaskParameters::split_feature(77, Some(1)))
        .await
        .unwrap();
    assert_eq!(execution.status, TaskStatus::Succeeded, "{execution:#?}");
}

#[test]
fn test_evict_finished_keeps_newest_and_running() {
    let executions = DashMap::new();
    let base = Utc::now();
    let mut finished = Vec::new();
    for minutes in 0..4 {
        let mut execution =
            TaskExecution::new(TaskType::SplitFeature, TaskParameters::split_feature(5, None));
        execution.status = TaskStatus::Succeeded;
        execution.finished_at = Some(base + Duration::minutes(minutes));
        finished.push(execution.task_id);
        executions.insert(execution.task_id, execution);
    }
    let running = TaskExecution::new(TaskType::SplitFeature, TaskParameters::split_feature(6, None));
    let running_id = running.task_id;
    executions.insert(running_id, running);

    evict_finished(&executions, 2);

    assert_eq!(executions.len(), 3);
    assert!(executions.contains_key(&running_id));
    assert!(!executions.contains_key(&finished[0]));
    assert!(!executions.contains_key(&finished[1]));
    assert!(executions.contains_key(&finished[2]));
    assert!(executions.contains_key(&finished[3]));
}

#[tokio::test]
async fn test_monitor_build_resolves_repository() {
    let harness = Harness {
        builds: Arc::new(FakeBuildService::new().with_build(
            9,
            "frontend-ci",
            "main",
            BuildStatus::Succeeded,
        )),
        ..Harness::new()
    };
    let orchestrator = harness.build();

    let report = orchestrator
        .monitor_build(9, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.tracking.repository, "frontend");
    assert!(orchestrator.monitor().registry().is_green("frontend").await);

    let err = orchestrator
        .monitor_build(10, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}
