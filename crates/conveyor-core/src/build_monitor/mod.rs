//! Build Monitor
//!
//! Drives one build chain at a time to a terminal state:
//!
//! ```text
//! Monitoring -> Succeeded
//!            -> Failed -> Analyzing -> Retrying -> Monitoring
//!                                   -> Escalated
//! ```
//!
//! Each [`BuildMonitor::track`] call owns its [`BuildTrackingState`]
//! outright, so concurrent builds never share retry counters. A `decision`
//! memory entry is written before every transition.

mod classifier;
mod registry;
mod types;

#[cfg(test)]
mod tests;

pub use classifier::{parse_diagnosis, Diagnosis, FailureClassifier, LlmFailureClassifier};
pub use registry::BuildRegistry;
pub use types::{
    BuildOutcome, BuildReport, BuildState, BuildSummary, BuildTrackingState, EscalationRequest,
    FailureClass, MonitorStats, TrackRequest, Transition,
};

use crate::agent::{metadata, AgentContext};
use crate::collaborators::{BuildInfo, BuildService, BuildStatus};
use crate::config::AgentSettings;
use crate::error::{Error, Result};
use crate::utils::text::tail;
use crate::utils::{call_with_backoff, RetryConfig};
use async_trait::async_trait;
use conveyor_llm::LlmProvider;
use conveyor_memory::{ActionRecord, Memory};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Agent id the monitor writes memory under
pub const BUILD_MONITOR_AGENT_ID: &str = "build_monitor";

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

const SYSTEM_PROMPT: &str = "You are the Build Monitor agent of an automated delivery system. \
You classify CI build failures as intermittent (network, timing, flaky tests), \
compilation errors, test failures or infrastructure problems, and suggest concrete fixes.";

/// Receives code-fix requests for escalated builds
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    /// Handle one escalation
    async fn handle(&self, request: &EscalationRequest) -> Result<()>;
}

enum Poll {
    Finished(BuildInfo),
    Vanished,
    Unreachable(Error),
    TimedOut,
    Cancelled,
}

#[derive(Default)]
struct Counters {
    tracked: AtomicU64,
    succeeded: AtomicU64,
    escalated: AtomicU64,
    retried: AtomicU64,
    active: AtomicU64,
}

/// Build failure classification and bounded retries
pub struct BuildMonitor {
    ctx: AgentContext,
    builds: Arc<dyn BuildService>,
    classifier: Arc<dyn FailureClassifier>,
    registry: BuildRegistry,
    escalation: OnceLock<Arc<dyn EscalationHandler>>,
    settings: AgentSettings,
    retry: RetryConfig,
    counters: Counters,
}

impl BuildMonitor {
    /// Monitor with an explicit classifier
    pub fn new(
        ctx: AgentContext,
        builds: Arc<dyn BuildService>,
        classifier: Arc<dyn FailureClassifier>,
        settings: AgentSettings,
    ) -> Self {
        let retry = settings.retry_config();
        Self {
            ctx,
            builds,
            classifier,
            registry: BuildRegistry::new(),
            escalation: OnceLock::new(),
            settings,
            retry,
            counters: Counters::default(),
        }
    }

    /// Monitor classifying failures with `llm`
    pub fn with_llm(
        memory: Memory,
        llm: Arc<dyn LlmProvider>,
        builds: Arc<dyn BuildService>,
        settings: AgentSettings,
    ) -> Self {
        let ctx = AgentContext::new(BUILD_MONITOR_AGENT_ID, SYSTEM_PROMPT, memory, llm);
        let classifier = Arc::new(LlmFailureClassifier::new(
            ctx.clone(),
            settings.log_excerpt_chars,
        ));
        Self::new(ctx, builds, classifier, settings)
    }

    /// Override the call-site retry policy
    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Install the handler for escalations. Only the first call takes effect.
    pub fn set_escalation_handler(&self, handler: Arc<dyn EscalationHandler>) -> bool {
        self.escalation.set(handler).is_ok()
    }

    /// Archived build results
    pub fn registry(&self) -> &BuildRegistry {
        &self.registry
    }

    /// Agent context
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Counters across every tracked build chain
    pub fn statistics(&self) -> MonitorStats {
        MonitorStats {
            tracked: self.counters.tracked.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            escalated: self.counters.escalated.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
        }
    }

    /// Track a queued build until it succeeds, escalates or `cancel` fires.
    #[instrument(skip(self, cancel), fields(build_id = request.build_id, repository = %request.repository))]
    pub async fn track(&self, request: TrackRequest, cancel: &CancellationToken) -> BuildReport {
        self.counters.tracked.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::Relaxed);

        let mut tracking = BuildTrackingState::new(&request, self.settings.max_retries);
        self.ctx
            .observe(
                format!(
                    "Tracking build {} of {} ({} on {})",
                    request.build_id, request.repository, request.definition, request.branch
                ),
                metadata!("build_id" => request.build_id, "repository" => &request.repository),
            )
            .await;

        let mut diagnosis = None;
        let mut escalation = None;

        let outcome = loop {
            match self.wait_for_completion(tracking.build_id, cancel).await {
                Poll::Cancelled => break BuildOutcome::Cancelled,
                Poll::TimedOut => {
                    let reason = format!(
                        "build did not finish within {}s",
                        self.settings.build_timeout_secs
                    );
                    escalation = Some(
                        self.escalate(&mut tracking, FailureClass::InfrastructureTimeout, reason, None)
                            .await,
                    );
                    break BuildOutcome::Escalated {
                        class: FailureClass::InfrastructureTimeout,
                    };
                }
                Poll::Vanished => {
                    escalation = Some(
                        self.escalate(
                            &mut tracking,
                            FailureClass::Infrastructure,
                            "build no longer exists",
                            None,
                        )
                        .await,
                    );
                    break BuildOutcome::Escalated {
                        class: FailureClass::Infrastructure,
                    };
                }
                Poll::Unreachable(e) => {
                    escalation = Some(
                        self.escalate(
                            &mut tracking,
                            FailureClass::Infrastructure,
                            format!("build service unreachable: {e}"),
                            None,
                        )
                        .await,
                    );
                    break BuildOutcome::Escalated {
                        class: FailureClass::Infrastructure,
                    };
                }
                Poll::Finished(info) if info.status == BuildStatus::Succeeded => {
                    self.transition(&mut tracking, BuildState::Succeeded, "build succeeded")
                        .await;
                    break BuildOutcome::Succeeded;
                }
                Poll::Finished(info) if info.status == BuildStatus::Cancelled => {
                    escalation = Some(
                        self.escalate(
                            &mut tracking,
                            FailureClass::Infrastructure,
                            "build was cancelled outside the monitor",
                            None,
                        )
                        .await,
                    );
                    break BuildOutcome::Escalated {
                        class: FailureClass::Infrastructure,
                    };
                }
                Poll::Finished(info) => {
                    tracking.logs_ref = info.logs_ref.clone();
                    self.transition(&mut tracking, BuildState::Failed, "build failed")
                        .await;
                    self.transition(&mut tracking, BuildState::Analyzing, "classifying failure")
                        .await;

                    let logs = match call_with_backoff(&self.retry, || {
                        self.builds.logs(tracking.build_id)
                    })
                    .await
                    {
                        Ok(logs) => Some(logs),
                        Err(e) => {
                            warn!(build_id = tracking.build_id, error = %e, "Build logs unavailable");
                            None
                        }
                    };
                    let found = self.classifier.classify(&tracking, logs.as_deref()).await;
                    let class = found.class;
                    tracking.failure_class = Some(class);
                    diagnosis = Some(found);

                    if class.is_retryable() && tracking.can_retry() {
                        if cancel.is_cancelled() {
                            break BuildOutcome::Cancelled;
                        }
                        match self.retry_build(&mut tracking).await {
                            Ok(()) => continue,
                            Err(e) => {
                                escalation = Some(
                                    self.escalate(
                                        &mut tracking,
                                        FailureClass::Infrastructure,
                                        format!("retry could not be queued: {e}"),
                                        logs,
                                    )
                                    .await,
                                );
                                break BuildOutcome::Escalated {
                                    class: FailureClass::Infrastructure,
                                };
                            }
                        }
                    }

                    let reason = if class.is_retryable() {
                        format!("{class} failure persisted after {} retries", tracking.retry_count)
                    } else {
                        format!("{class} failure is not retryable")
                    };
                    escalation = Some(self.escalate(&mut tracking, class, reason, logs).await);
                    break BuildOutcome::Escalated { class };
                }
            }
        };

        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        let report = BuildReport {
            tracking,
            outcome,
            diagnosis,
            escalation,
        };
        self.finish(&report).await;
        report
    }

    async fn wait_for_completion(&self, build_id: u64, cancel: &CancellationToken) -> Poll {
        let poll_interval = self.settings.poll_interval().max(MIN_POLL_INTERVAL);
        let poll = async {
            loop {
                match call_with_backoff(&self.retry, || self.builds.get(build_id)).await {
                    Ok(Some(info)) if info.status.is_terminal() => return Poll::Finished(info),
                    Ok(Some(_)) => {}
                    Ok(None) => return Poll::Vanished,
                    Err(e) => return Poll::Unreachable(e),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Poll::Cancelled,
            polled = tokio::time::timeout(self.settings.build_timeout(), poll) => {
                polled.unwrap_or(Poll::TimedOut)
            }
        }
    }

    async fn transition(
        &self,
        tracking: &mut BuildTrackingState,
        to: BuildState,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        self.ctx
            .decide(
                format!(
                    "Build {}: {} -> {to} ({reason})",
                    tracking.build_id, tracking.state
                ),
                metadata!(
                    "build_id" => tracking.build_id,
                    "repository" => &tracking.repository,
                    "from" => tracking.state,
                    "to" => to,
                    "retry_count" => tracking.retry_count,
                ),
            )
            .await;
        tracking.enter(to, reason);
        info!(
            build_id = tracking.build_id,
            state = %to,
            retry_count = tracking.retry_count,
            "Build state changed"
        );
    }

    async fn retry_build(&self, tracking: &mut BuildTrackingState) -> Result<()> {
        let failed_build = tracking.build_id;
        self.transition(
            tracking,
            BuildState::Retrying,
            format!(
                "intermittent failure, retry {} of {}",
                tracking.retry_count + 1,
                tracking.max_retries
            ),
        )
        .await;

        let started = Instant::now();
        let queued = call_with_backoff(&self.retry, || {
            self.builds.queue(&tracking.definition, &tracking.branch)
        })
        .await;

        let record = ActionRecord::new(
            BUILD_MONITOR_AGENT_ID,
            "retry_build",
            format!("build:{failed_build}"),
        )
        .with_parameters(json!({
            "definition": tracking.definition,
            "branch": tracking.branch,
            "original_build_id": tracking.original_build_id,
            "attempt": tracking.retry_count,
        }))
        .with_duration(started.elapsed());

        match queued {
            Ok(new_build) => {
                self.ctx
                    .record_action(record.with_result(json!({ "new_build_id": new_build })))
                    .await;
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                let reason = format!("retry build {new_build} queued for {failed_build}");
                tracking.build_id = new_build;
                tracking.attempts.push(new_build);
                self.transition(tracking, BuildState::Monitoring, reason).await;
                Ok(())
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

    async fn escalate(
        &self,
        tracking: &mut BuildTrackingState,
        class: FailureClass,
        reason: impl Into<String>,
        logs: Option<String>,
    ) -> EscalationRequest {
        tracking.failure_class = Some(class);
        self.transition(tracking, BuildState::Escalated, reason).await;

        let request = EscalationRequest {
            build_id: tracking.build_id,
            repository: tracking.repository.clone(),
            branch: tracking.branch.clone(),
            failure_class: class,
            logs_ref: tracking.logs_ref.clone(),
            logs_excerpt: tail(logs.as_deref().unwrap_or_default(), self.settings.log_excerpt_chars)
                .to_string(),
        };

        match self.escalation.get() {
            Some(handler) => {
                if let Err(e) = handler.handle(&request).await {
                    warn!(build_id = request.build_id, error = %e, "Escalation handler failed");
                }
            }
            None => warn!(
                build_id = request.build_id,
                class = %class,
                "No escalation handler installed"
            ),
        }
        request
    }

    async fn finish(&self, report: &BuildReport) {
        let tracking = &report.tracking;
        match report.outcome {
            BuildOutcome::Succeeded => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            BuildOutcome::Escalated { .. } => {
                self.counters.escalated.fetch_add(1, Ordering::Relaxed);
            }
            BuildOutcome::Cancelled => {}
        }
        if tracking.state.is_terminal() {
            self.registry.archive(report.summary()).await;
        }

        let summary = match report.outcome {
            BuildOutcome::Succeeded => format!(
                "Build chain {} for {} succeeded as build {} after {} retries",
                tracking.original_build_id, tracking.repository, tracking.build_id, tracking.retry_count
            ),
            BuildOutcome::Escalated { class } => format!(
                "Build chain {} for {} escalated ({class}) at build {}",
                tracking.original_build_id, tracking.repository, tracking.build_id
            ),
            BuildOutcome::Cancelled => format!(
                "Tracking of build chain {} for {} cancelled",
                tracking.original_build_id, tracking.repository
            ),
        };
        self.ctx
            .record_result(
                summary,
                report.succeeded(),
                metadata!(
                    "build_id" => tracking.build_id,
                    "original_build_id" => tracking.original_build_id,
                    "repository" => &tracking.repository,
                    "state" => tracking.state,
                    "retry_count" => tracking.retry_count,
                    "attempts" => &tracking.attempts,
                ),
            )
            .await;
    }
}
