//! Conveyor Core - orchestration engine
//!
//! This crate contains the delivery logic:
//! - [`orchestrator`]: task dispatch, per-repository fan-out, aggregation
//! - [`build_monitor`]: failure classification and bounded build retries
//! - [`flows`]: requirements analysis, code changes, releases
//! - [`collaborators`]: the work item, build, git and build-tool seams
//! - [`agent`]: memory-backed agent context shared by all of the above

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod build_monitor;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod flows;
pub mod orchestrator;
pub mod repository;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::AgentContext;
pub use build_monitor::{
    BuildMonitor, BuildOutcome, BuildRegistry, BuildReport, BuildState, BuildSummary,
    BuildTrackingState, Diagnosis, EscalationHandler, EscalationRequest, FailureClass,
    FailureClassifier, LlmFailureClassifier, MonitorStats, TrackRequest,
};
pub use collaborators::{
    BuildInfo, BuildService, BuildStatus, BuildTool, Fields, GitService, LocalBuildResult,
    PullRequest, PullRequestRequest, WorkItem, WorkItemService,
};
pub use config::{AgentSettings, RetrySettings};
pub use error::{Error, Result, UserFriendlyError};
pub use orchestrator::{
    Collaborators, Orchestrator, SubTask, SubTaskDetail, SubTaskFailure, SubTaskStatus,
    TaskExecution, TaskParameters, TaskStatus, TaskType,
};
pub use repository::{RepositoryBinding, RepositoryCatalog};
pub use utils::{retry_with_backoff, RetryConfig, RetryError};
