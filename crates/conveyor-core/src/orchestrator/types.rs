//! Task and sub-task types
//!
//! - `TaskType` and `TaskParameters` describe a dispatch request
//! - `TaskExecution` and `SubTask` track what the orchestrator did with it
//! - `TaskStatus::aggregate` folds sub-task outcomes into a task status

use crate::build_monitor::BuildSummary;
use crate::error::{Error, UserFriendlyError};
use crate::flows::{ChangeOutcome, FixPlan, ReadinessReport, ReleasePlan, SplitOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of high-level task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Implement a user story across repositories
    ImplementStory,
    /// Split a feature into user stories
    SplitFeature,
    /// Create a multi-component release
    CreateRelease,
}

impl TaskType {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImplementStory => "implement_story",
            Self::SplitFeature => "split_feature",
            Self::CreateRelease => "create_release",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "implement_story" => Ok(Self::ImplementStory),
            "split_feature" => Ok(Self::SplitFeature),
            "create_release" => Ok(Self::CreateRelease),
            other => Err(Error::validation(
                "task_type",
                format!("unknown task type '{other}'"),
            )),
        }
    }
}

/// Parameters of a dispatch; which ones apply depends on the task type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParameters {
    /// Story to implement
    pub story_id: Option<u64>,
    /// Feature to split
    pub feature_id: Option<u64>,
    /// Number of stories to split into
    pub story_count: Option<u32>,
    /// Repositories or component groups the story may touch
    pub repositories: Vec<String>,
    /// Repositories or component groups to release
    pub components: Vec<String>,
    /// Branch the release is cut from
    pub source_branch: Option<String>,
    /// Release name; dated when absent
    pub release_name: Option<String>,
}

impl TaskParameters {
    /// Parameters for `implement_story`
    pub fn implement_story(story_id: u64, repositories: &[&str]) -> Self {
        Self {
            story_id: Some(story_id),
            repositories: repositories.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Parameters for `split_feature`
    pub fn split_feature(feature_id: u64, story_count: Option<u32>) -> Self {
        Self {
            feature_id: Some(feature_id),
            story_count,
            ..Default::default()
        }
    }

    /// Parameters for `create_release`
    pub fn create_release(components: &[&str]) -> Self {
        Self {
            components: components.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Set the release source branch
    pub fn with_source_branch(mut self, branch: impl Into<String>) -> Self {
        self.source_branch = Some(branch.into());
        self
    }

    /// Set the release name
    pub fn with_release_name(mut self, name: impl Into<String>) -> Self {
        self.release_name = Some(name.into());
        self
    }
}

/// Overall task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not started
    Pending,
    /// Sub-tasks in flight
    Running,
    /// Some sub-tasks failed
    PartialFailure,
    /// Every sub-task succeeded
    Succeeded,
    /// Nothing could be dispatched
    Failed,
}

impl TaskStatus {
    /// Status of a task whose sub-tasks are all terminal
    pub fn aggregate(sub_tasks: &[SubTask]) -> Self {
        if sub_tasks.is_empty() {
            Self::Failed
        } else if sub_tasks.iter().all(|s| s.status == SubTaskStatus::Succeeded) {
            Self::Succeeded
        } else {
            Self::PartialFailure
        }
    }

    /// Whether the task is finished
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PartialFailure | Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::PartialFailure => "partial_failure",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// Sub-task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    /// Waiting for a concurrency slot
    Pending,
    /// In flight
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with a failure
    Failed,
    /// Stopped by cancellation
    Cancelled,
}

impl fmt::Display for SubTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Failure of a sub-task or of a dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskFailure {
    /// Failure label such as `collaborator-unavailable` or `build:test-failure`
    pub class: String,
    /// Human readable summary
    pub summary: String,
}

impl SubTaskFailure {
    /// Failure with an explicit class
    pub fn new(class: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            summary: summary.into(),
        }
    }

    /// Failure describing `error`
    pub fn from_error(error: &Error) -> Self {
        Self::new(error.failure_label(), error.user_message())
    }
}

/// What a sub-task produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubTaskDetail {
    /// Code change in one repository
    Change(ChangeOutcome),
    /// Feature split
    Split(SplitOutcome),
    /// Readiness of one release component
    Readiness {
        /// Build the verdict is based on
        build_id: Option<u64>,
        /// Its state or status
        state: Option<String>,
        /// Blocking issues
        issues: Vec<String>,
    },
    /// Created release
    Release(ReleasePlan),
    /// Tracked build
    Build(BuildSummary),
    /// Fix plan for an escalated build
    Fix(FixPlan),
}

/// One unit of delegated work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    /// Sub-task id
    pub id: Uuid,
    /// Repository, component or work item the sub-task targets
    pub target: String,
    /// Status
    pub status: SubTaskStatus,
    /// What it produced
    pub detail: Option<SubTaskDetail>,
    /// Why it failed
    pub failure: Option<SubTaskFailure>,
}

impl SubTask {
    /// Pending sub-task for `target`
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            status: SubTaskStatus::Pending,
            detail: None,
            failure: None,
        }
    }

    /// Mark as succeeded
    pub fn succeed(mut self, detail: SubTaskDetail) -> Self {
        self.status = SubTaskStatus::Succeeded;
        self.detail = Some(detail);
        self
    }

    /// Mark as failed with `error`; cancellation is its own status
    pub fn fail(mut self, error: &Error, detail: Option<SubTaskDetail>) -> Self {
        self.status = if matches!(error, Error::Cancelled) {
            SubTaskStatus::Cancelled
        } else {
            SubTaskStatus::Failed
        };
        self.detail = detail;
        self.failure = Some(SubTaskFailure::from_error(error));
        self
    }

    /// Mark as failed with an explicit failure
    pub fn fail_with(mut self, failure: SubTaskFailure, detail: Option<SubTaskDetail>) -> Self {
        self.status = SubTaskStatus::Failed;
        self.detail = detail;
        self.failure = Some(failure);
        self
    }
}

/// Record of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Task id
    pub task_id: Uuid,
    /// Task type
    pub task_type: TaskType,
    /// Parameters as given
    pub parameters: TaskParameters,
    /// Status
    pub status: TaskStatus,
    /// Sub-tasks, one per target, in dispatch order
    pub sub_tasks: Vec<SubTask>,
    /// Why nothing was dispatched
    pub dispatch_error: Option<SubTaskFailure>,
    /// Dispatch time
    pub started_at: DateTime<Utc>,
    /// Completion time
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskExecution {
    /// Pending execution
    pub fn new(task_type: TaskType, parameters: TaskParameters) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type,
            parameters,
            status: TaskStatus::Pending,
            sub_tasks: Vec::new(),
            dispatch_error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Finish with the aggregate of `sub_tasks`
    pub(crate) fn complete(&mut self, sub_tasks: Vec<SubTask>) {
        self.status = TaskStatus::aggregate(&sub_tasks);
        self.sub_tasks = sub_tasks;
        self.finished_at = Some(Utc::now());
    }

    /// Finish as failed before any sub-task was dispatched
    pub(crate) fn reject(&mut self, error: &Error) {
        self.status = TaskStatus::Failed;
        self.dispatch_error = Some(SubTaskFailure::from_error(error));
        self.finished_at = Some(Utc::now());
    }

    /// Targets of failed or cancelled sub-tasks
    pub fn failed_targets(&self) -> Vec<&str> {
        self.sub_tasks
            .iter()
            .filter(|s| s.status != SubTaskStatus::Succeeded)
            .map(|s| s.target.as_str())
            .collect()
    }

    /// Sub-task for `target`
    pub fn sub_task(&self, target: &str) -> Option<&SubTask> {
        self.sub_tasks.iter().find(|s| s.target == target)
    }
}
