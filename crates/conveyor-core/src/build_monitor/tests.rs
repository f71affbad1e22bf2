use super::*;
use crate::testing::{classification, fast_settings, monitor, FakeBuildService, RecordingEscalations};
use conveyor_llm::mock::ScriptedProvider;
use conveyor_memory::{MemoryKind, RecentQuery};
use BuildState::*;

fn request(build_id: u64) -> TrackRequest {
    TrackRequest::new(build_id, "api", "api-ci", "feature/12345-login")
}

#[tokio::test]
async fn test_intermittent_twice_then_compilation_error() {
    let builds = Arc::new(
        FakeBuildService::new()
            .with_build(1, "api-ci", "feature/12345-login", BuildStatus::Failed)
            .with_script("api-ci", &[BuildStatus::Failed, BuildStatus::Failed]),
    );
    let llm = Arc::new(
        ScriptedProvider::new()
            .then_answer(classification("intermittent"))
            .then_answer(classification("intermittent"))
            .then_answer(classification("compilation_error")),
    );
    let memory = Memory::in_memory();
    let monitor = monitor(memory.clone(), llm, builds.clone(), fast_settings());
    let escalations = Arc::new(RecordingEscalations::default());
    assert!(monitor.set_escalation_handler(escalations.clone()));

    let report = monitor.track(request(1), &CancellationToken::new()).await;

    assert_eq!(
        report.tracking.states(),
        vec![
            Monitoring, Failed, Analyzing, Retrying, Monitoring, Failed, Analyzing, Retrying,
            Monitoring, Failed, Analyzing, Escalated
        ]
    );
    assert_eq!(report.tracking.retry_count, 2);
    assert_eq!(report.tracking.attempts, vec![1, 101, 102]);
    assert_eq!(
        report.outcome,
        BuildOutcome::Escalated {
            class: FailureClass::CompilationError
        }
    );
    assert!(matches!(
        report.error(),
        Some(Error::BuildFailurePersistent {
            build_id: 102,
            class: FailureClass::CompilationError
        })
    ));
    assert_eq!(builds.queued().len(), 2);

    let received = escalations.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].failure_class, FailureClass::CompilationError);
    assert_eq!(received[0].build_id, 102);
    assert!(received[0].logs_excerpt.contains("BUILD FAILURE"));

    let retries = memory.statistics(BUILD_MONITOR_AGENT_ID, Some("retry_build")).await;
    assert_eq!(retries.count, 2);
    assert_eq!(retries.successes, 2);
}

#[tokio::test]
async fn test_every_transition_is_preceded_by_a_decision() {
    let builds = Arc::new(
        FakeBuildService::new().with_build(1, "api-ci", "main", BuildStatus::Failed),
    );
    let llm = Arc::new(ScriptedProvider::new().with_fallback(classification("intermittent")));
    let memory = Memory::in_memory();
    let monitor = monitor(memory.clone(), llm, builds, fast_settings());

    let report = monitor.track(request(1), &CancellationToken::new()).await;
    assert!(report.succeeded());

    let decisions = memory
        .recent(
            &RecentQuery::new(BUILD_MONITOR_AGENT_ID)
                .kind(MemoryKind::Decision)
                .limit(100),
        )
        .await;
    // The initial Monitoring entry is registration, not a transition.
    assert_eq!(decisions.len(), report.tracking.history.len() - 1);
    assert!(decisions[0].content.contains("-> succeeded"));
}

#[tokio::test]
async fn test_retries_are_bounded_then_escalate() {
    let builds = Arc::new(
        FakeBuildService::new()
            .with_build(1, "api-ci", "main", BuildStatus::Failed)
            .with_script("api-ci", &[BuildStatus::Failed; 5]),
    );
    let llm = Arc::new(ScriptedProvider::new().with_fallback(classification("intermittent")));
    let monitor = monitor(Memory::in_memory(), llm, builds.clone(), fast_settings());

    let report = monitor.track(request(1), &CancellationToken::new()).await;

    assert_eq!(report.tracking.retry_count, 3);
    assert_eq!(report.tracking.state, Escalated);
    assert_eq!(builds.queued().len(), 3);
    assert!(report.tracking.history.iter().all(|t| t.retry_count <= 3));
    assert!(matches!(
        report.error(),
        Some(Error::BuildFailureIntermittent { .. })
    ));
    let states = report.tracking.states();
    assert_eq!(states.iter().filter(|s| **s == Retrying).count(), 3);
    assert_eq!(*states.last().unwrap(), Escalated);
}

#[tokio::test]
async fn test_retry_success_is_archived() {
    let builds = Arc::new(
        FakeBuildService::new().with_build(1, "api-ci", "main", BuildStatus::Failed),
    );
    let llm = Arc::new(ScriptedProvider::new().then_answer(classification("intermittent")));
    let monitor = monitor(Memory::in_memory(), llm, builds, fast_settings());

    let report = monitor.track(request(1), &CancellationToken::new()).await;

    assert!(report.succeeded());
    assert_eq!(report.tracking.retry_count, 1);
    assert!(report.error().is_none());
    assert!(monitor.registry().is_green("api").await);

    let stats = monitor.statistics();
    assert_eq!(stats.tracked, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_classifier_failure_escalates_as_infrastructure() {
    let builds = Arc::new(
        FakeBuildService::new().with_build(1, "api-ci", "main", BuildStatus::Failed),
    );
    let llm = Arc::new(ScriptedProvider::new().then_fail("model not loaded"));
    let monitor = monitor(Memory::in_memory(), llm, builds.clone(), fast_settings());

    let report = monitor.track(request(1), &CancellationToken::new()).await;

    assert_eq!(
        report.outcome,
        BuildOutcome::Escalated {
            class: FailureClass::Infrastructure
        }
    );
    assert!(builds.queued().is_empty());
    assert!(!monitor.registry().is_green("api").await);
}

#[tokio::test]
async fn test_polling_timeout_escalates() {
    let builds = Arc::new(
        FakeBuildService::new().with_build(1, "api-ci", "main", BuildStatus::InProgress),
    );
    let llm = Arc::new(ScriptedProvider::new());
    let settings = AgentSettings {
        build_timeout_secs: 1,
        ..fast_settings()
    };
    let monitor = monitor(Memory::in_memory(), llm.clone(), builds, settings);

    let report = monitor.track(request(1), &CancellationToken::new()).await;

    assert_eq!(
        report.outcome,
        BuildOutcome::Escalated {
            class: FailureClass::InfrastructureTimeout
        }
    );
    assert_eq!(report.tracking.states(), vec![Monitoring, Escalated]);
    assert!(matches!(report.error(), Some(Error::EscalationRequired { .. })));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_disappeared_build_escalates_as_infrastructure() {
    let builds = Arc::new(
        FakeBuildService::new().with_build(1, "api-ci", "main", BuildStatus::Failed),
    );
    builds.remove(1);
    let monitor = monitor(
        Memory::in_memory(),
        Arc::new(ScriptedProvider::new()),
        builds,
        fast_settings(),
    );

    let report = monitor.track(request(1), &CancellationToken::new()).await;
    assert_eq!(report.tracking.failure_class, Some(FailureClass::Infrastructure));
    assert_eq!(report.tracking.state, Escalated);
}

#[tokio::test]
async fn test_externally_cancelled_build_escalates() {
    let builds = Arc::new(
        FakeBuildService::new().with_build(1, "api-ci", "main", BuildStatus::Cancelled),
    );
    let monitor = monitor(
        Memory::in_memory(),
        Arc::new(ScriptedProvider::new()),
        builds,
        fast_settings(),
    );

    let report = monitor.track(request(1), &CancellationToken::new()).await;
    assert_eq!(
        report.outcome,
        BuildOutcome::Escalated {
            class: FailureClass::Infrastructure
        }
    );
}

#[tokio::test]
async fn test_unreachable_build_service_escalates() {
    let builds = Arc::new(
        FakeBuildService::new()
            .with_build(1, "api-ci", "main", BuildStatus::InProgress)
            .get_unavailable(),
    );
    let monitor = monitor(
        Memory::in_memory(),
        Arc::new(ScriptedProvider::new()),
        builds,
        fast_settings(),
    );

    let report = monitor.track(request(1), &CancellationToken::new()).await;
    assert_eq!(report.tracking.failure_class, Some(FailureClass::Infrastructure));
}

#[tokio::test]
async fn test_queue_failure_escalates_and_is_logged() {
    let builds = Arc::new(
        FakeBuildService::new()
            .with_build(1, "api-ci", "main", BuildStatus::Failed)
            .queue_unavailable(),
    );
    let llm = Arc::new(ScriptedProvider::new().then_answer(classification("intermittent")));
    let memory = Memory::in_memory();
    let monitor = monitor(memory.clone(), llm, builds, fast_settings());

    let report = monitor.track(request(1), &CancellationToken::new()).await;

    assert_eq!(report.tracking.failure_class, Some(FailureClass::Infrastructure));
    assert_eq!(
        report.tracking.states(),
        vec![Monitoring, Failed, Analyzing, Retrying, Escalated]
    );
    let retries = memory.statistics(BUILD_MONITOR_AGENT_ID, Some("retry_build")).await;
    assert_eq!(retries.failures, 1);
}

#[tokio::test]
async fn test_cancelled_tracking_stops_without_archiving() {
    let builds = Arc::new(
        FakeBuildService::new().with_build(1, "api-ci", "main", BuildStatus::InProgress),
    );
    let monitor = monitor(
        Memory::in_memory(),
        Arc::new(ScriptedProvider::new()),
        builds.clone(),
        fast_settings(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = monitor.track(request(1), &cancel).await;

    assert_eq!(report.outcome, BuildOutcome::Cancelled);
    assert!(matches!(report.error(), Some(Error::Cancelled)));
    assert!(builds.queued().is_empty());
    assert!(monitor.registry().latest("api").await.is_none());
    assert_eq!(monitor.statistics().active, 0);
}

#[tokio::test]
async fn test_concurrent_builds_keep_separate_counters() {
    let builds = Arc::new(
        FakeBuildService::new()
            .with_build(1, "api-ci", "main", BuildStatus::Failed)
            .with_build(2, "web-ci", "main", BuildStatus::Failed)
            .with_script("api-ci", &[BuildStatus::Failed]),
    );
    let llm = Arc::new(ScriptedProvider::new().with_fallback(classification("intermittent")));
    let monitor = monitor(Memory::in_memory(), llm, builds, fast_settings());
    let cancel = CancellationToken::new();

    let (api, web) = tokio::join!(
        monitor.track(TrackRequest::new(1, "api", "api-ci", "main"), &cancel),
        monitor.track(TrackRequest::new(2, "web", "web-ci", "main"), &cancel),
    );

    assert_eq!(api.tracking.retry_count, 2);
    assert_eq!(web.tracking.retry_count, 1);
    assert!(api.succeeded() && web.succeeded());
    assert_eq!(monitor.statistics().tracked, 2);
}
