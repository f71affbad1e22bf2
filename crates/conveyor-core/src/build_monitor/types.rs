use super::classifier::Diagnosis;
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build monitor state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    /// Waiting for the current build to finish
    Monitoring,
    /// The current build failed
    Failed,
    /// Classifying the failure
    Analyzing,
    /// Queuing a new build
    Retrying,
    /// Terminal: the build passed
    Succeeded,
    /// Terminal: handed off for a fix
    Escalated,
}

impl BuildState {
    /// Whether no further transition can follow
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Escalated)
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Monitoring => "monitoring",
            Self::Failed => "failed",
            Self::Analyzing => "analyzing",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Why a build failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// Flaky, non-reproducible; eligible for retry
    Intermittent,
    /// The code does not compile
    CompilationError,
    /// Tests fail
    TestFailure,
    /// Agents, network or the build service itself
    Infrastructure,
    /// The build did not finish within the polling bound
    InfrastructureTimeout,
}

impl FailureClass {
    /// Kebab-case label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intermittent => "intermittent",
            Self::CompilationError => "compilation-error",
            Self::TestFailure => "test-failure",
            Self::Infrastructure => "infrastructure",
            Self::InfrastructureTimeout => "infrastructure-timeout",
        }
    }

    /// Parse a classifier label. Accepts `snake_case`, `kebab-case` and
    /// the `_failure`/`_issue` suffixed spellings.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "intermittent" | "intermittent-failure" | "flaky" => Some(Self::Intermittent),
            "compilation-error" | "compile-error" => Some(Self::CompilationError),
            "test-failure" | "test-failures" => Some(Self::TestFailure),
            "infrastructure" | "infrastructure-issue" => Some(Self::Infrastructure),
            "infrastructure-timeout" => Some(Self::InfrastructureTimeout),
            _ => None,
        }
    }

    /// Whether a retry may fix it
    pub fn is_retryable(self) -> bool {
        self == Self::Intermittent
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a tracking state's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// State entered
    pub state: BuildState,
    /// Build the transition applies to
    pub build_id: u64,
    /// Retry count after the transition
    pub retry_count: u32,
    /// When it happened
    pub at: DateTime<Utc>,
    /// Why
    pub reason: String,
}

/// A build to start tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRequest {
    /// Build already queued
    pub build_id: u64,
    /// Repository the build belongs to
    pub repository: String,
    /// Build definition, reused for retries
    pub definition: String,
    /// Source branch, reused for retries
    pub branch: String,
}

impl TrackRequest {
    /// New request
    pub fn new(
        build_id: u64,
        repository: impl Into<String>,
        definition: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            build_id,
            repository: repository.into(),
            definition: definition.into(),
            branch: branch.into(),
        }
    }
}

/// State of one monitored build chain (the original build plus retries)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildTrackingState {
    /// Build currently being watched
    pub build_id: u64,
    /// Build the chain started with
    pub original_build_id: u64,
    /// Repository
    pub repository: String,
    /// Build definition
    pub definition: String,
    /// Source branch
    pub branch: String,
    /// Current state
    pub state: BuildState,
    /// Retries queued so far
    pub retry_count: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Latest classification
    pub failure_class: Option<FailureClass>,
    /// Where the latest failure's logs live
    pub logs_ref: Option<String>,
    /// Build ids in queue order
    pub attempts: Vec<u64>,
    /// Every transition, oldest first
    pub history: Vec<Transition>,
}

impl BuildTrackingState {
    /// Fresh state in `Monitoring`
    pub fn new(request: &TrackRequest, max_retries: u32) -> Self {
        let mut state = Self {
            build_id: request.build_id,
            original_build_id: request.build_id,
            repository: request.repository.clone(),
            definition: request.definition.clone(),
            branch: request.branch.clone(),
            state: BuildState::Monitoring,
            retry_count: 0,
            max_retries,
            failure_class: None,
            logs_ref: None,
            attempts: vec![request.build_id],
            history: Vec::new(),
        };
        state.push_history(BuildState::Monitoring, "build registered");
        state
    }

    /// Whether another retry fits in the budget
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// States visited, oldest first
    pub fn states(&self) -> Vec<BuildState> {
        self.history.iter().map(|t| t.state).collect()
    }

    pub(crate) fn enter(&mut self, state: BuildState, reason: impl Into<String>) {
        if state == BuildState::Retrying {
            self.retry_count += 1;
        }
        self.state = state;
        self.push_history(state, reason);
    }

    fn push_history(&mut self, state: BuildState, reason: impl Into<String>) {
        self.history.push(Transition {
            state,
            build_id: self.build_id,
            retry_count: self.retry_count,
            at: Utc::now(),
            reason: reason.into(),
        });
    }
}

/// How tracking ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// The build (or a retry) passed
    Succeeded,
    /// Handed off with this class
    Escalated {
        /// Final classification
        class: FailureClass,
    },
    /// Tracking stopped by the caller
    Cancelled,
}

/// A code-fix request emitted on escalation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRequest {
    /// Last build of the chain
    pub build_id: u64,
    /// Repository
    pub repository: String,
    /// Branch
    pub branch: String,
    /// Final classification
    pub failure_class: FailureClass,
    /// Where the logs live
    pub logs_ref: Option<String>,
    /// The end of the build log
    pub logs_excerpt: String,
}

/// Final report of a `track` call
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Final tracking state, with the full history
    pub tracking: BuildTrackingState,
    /// How it ended
    pub outcome: BuildOutcome,
    /// Latest classifier output
    pub diagnosis: Option<Diagnosis>,
    /// Fix request emitted on escalation
    pub escalation: Option<EscalationRequest>,
}

impl BuildReport {
    /// Whether the build chain ended green
    pub fn succeeded(&self) -> bool {
        self.outcome == BuildOutcome::Succeeded
    }

    /// The failure, if tracking did not end green
    pub fn error(&self) -> Option<Error> {
        let build_id = self.tracking.build_id;
        match self.outcome {
            BuildOutcome::Succeeded => None,
            BuildOutcome::Cancelled => Some(Error::Cancelled),
            BuildOutcome::Escalated {
                class: FailureClass::Intermittent,
            } => Some(Error::BuildFailureIntermittent { build_id }),
            BuildOutcome::Escalated {
                class: class @ (FailureClass::CompilationError | FailureClass::TestFailure),
            } => Some(Error::BuildFailurePersistent { build_id, class }),
            BuildOutcome::Escalated { class } => Some(Error::EscalationRequired {
                build_id,
                class,
                logs_ref: self.tracking.logs_ref.clone(),
            }),
        }
    }

    /// Condensed form kept in the registry
    pub fn summary(&self) -> BuildSummary {
        BuildSummary::from_tracking(&self.tracking)
    }
}

/// Archived result of a finished build chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Repository
    pub repository: String,
    /// Last build of the chain
    pub build_id: u64,
    /// Build definition
    pub definition: String,
    /// Branch
    pub branch: String,
    /// Terminal state
    pub state: BuildState,
    /// Final classification, if it failed
    pub failure_class: Option<FailureClass>,
    /// Retries used
    pub retry_count: u32,
    /// When it was archived
    pub finished_at: DateTime<Utc>,
}

impl BuildSummary {
    /// Summarize a tracking state
    pub fn from_tracking(tracking: &BuildTrackingState) -> Self {
        Self {
            repository: tracking.repository.clone(),
            build_id: tracking.build_id,
            definition: tracking.definition.clone(),
            branch: tracking.branch.clone(),
            state: tracking.state,
            failure_class: tracking.failure_class,
            retry_count: tracking.retry_count,
            finished_at: Utc::now(),
        }
    }
}

/// Counters across every `track` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    /// Build chains registered
    pub tracked: u64,
    /// Chains that ended green
    pub succeeded: u64,
    /// Chains that ended escalated
    pub escalated: u64,
    /// Retry builds queued
    pub retried: u64,
    /// Chains still being tracked
    pub active: u64,
}
