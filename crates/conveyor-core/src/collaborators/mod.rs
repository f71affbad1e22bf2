//! Capability interfaces the core consumes
//!
//! The orchestrator, flows and build monitor only ever talk to these
//! traits. `conveyor-integrations` provides the Azure DevOps, git CLI and
//! Maven implementations; tests use mockall doubles.

use crate::error::Result;
use crate::repository::RepositoryBinding;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Work item field name to value
pub type Fields = BTreeMap<String, Value>;

/// A work item as the tracking system reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Work item id
    pub id: u64,
    /// `User Story`, `Feature`, `Release`, ...
    pub item_type: String,
    /// Title
    pub title: String,
    /// Description, possibly HTML
    #[serde(default)]
    pub description: String,
    /// Workflow state
    #[serde(default)]
    pub state: String,
    /// Acceptance criteria, possibly HTML
    #[serde(default)]
    pub acceptance_criteria: String,
    /// Remaining raw fields
    #[serde(default)]
    pub fields: Fields,
}

impl WorkItem {
    /// Work item with just the essentials
    pub fn new(id: u64, item_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id,
            item_type: item_type.into(),
            title: title.into(),
            description: String::new(),
            state: "New".to_string(),
            acceptance_criteria: String::new(),
            fields: Fields::new(),
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Build status as reported by the build service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Queued, not yet picked up
    NotStarted,
    /// Running
    InProgress,
    /// Finished successfully
    Succeeded,
    /// Finished with a failure
    Failed,
    /// Stopped before finishing
    Cancelled,
}

impl BuildStatus {
    /// Whether the build has finished one way or another
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A build as the build service reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Build id
    pub id: u64,
    /// Status
    pub status: BuildStatus,
    /// Build definition name
    pub definition: String,
    /// Source branch
    pub branch: String,
    /// Where the logs can be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_ref: Option<String>,
    /// Completion time, for finished builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Pull request to open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestRequest {
    /// Branch with the change
    pub source_branch: String,
    /// Branch to merge into
    pub target_branch: String,
    /// Title
    pub title: String,
    /// Body
    pub description: String,
    /// Work items to link
    #[serde(default)]
    pub work_item_ids: Vec<u64>,
}

/// An opened pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull request id
    pub id: u64,
    /// Web URL
    pub url: String,
    /// Branch with the change
    pub source_branch: String,
    /// Branch to merge into
    pub target_branch: String,
    /// Title
    pub title: String,
}

/// Outcome of a local build tool run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalBuildResult {
    /// Whether the tool exited successfully
    pub success: bool,
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// The end of the combined output
    pub output_tail: String,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Work item tracking system
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkItemService: Send + Sync {
    /// Fetch a work item
    async fn get(&self, id: u64) -> Result<WorkItem>;

    /// Update fields of a work item
    async fn update(&self, id: u64, fields: &Fields) -> Result<()>;

    /// Create a work item, returning its id
    async fn create(
        &self,
        item_type: &str,
        title: &str,
        description: &str,
        fields: &Fields,
    ) -> Result<u64>;

    /// Split a feature into `count` child stories, returning their ids.
    ///
    /// An error means no story was created; stories created before a later
    /// failure are returned as a shorter list.
    async fn split(&self, id: u64, count: u32) -> Result<Vec<u64>>;
}

/// CI build system
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Current state of a build; `None` when it no longer exists
    async fn get(&self, build_id: u64) -> Result<Option<BuildInfo>>;

    /// Build log text
    async fn logs(&self, build_id: u64) -> Result<String>;

    /// Queue a build, returning its id
    async fn queue(&self, definition: &str, branch: &str) -> Result<u64>;

    /// Most recent build of `definition` on `branch`
    async fn latest(&self, definition: &str, branch: &str) -> Result<Option<BuildInfo>>;
}

/// Source control operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitService: Send + Sync {
    /// Make sure an up-to-date checkout exists, returning its path
    async fn clone_or_update(&self, repo: &RepositoryBinding) -> Result<PathBuf>;

    /// Create and switch to a branch
    async fn create_branch(&self, repo: &RepositoryBinding, name: &str) -> Result<()>;

    /// Commit all changes and push the branch, returning the commit id.
    ///
    /// Repeating the call after a failed push must not add a second commit.
    async fn commit_and_push(
        &self,
        repo: &RepositoryBinding,
        branch: &str,
        message: &str,
    ) -> Result<String>;

    /// Open a pull request, or return the one already open for the same
    /// branches
    async fn create_pull_request(
        &self,
        repo: &RepositoryBinding,
        request: &PullRequestRequest,
    ) -> Result<PullRequest>;
}

/// Local build tool run before pushing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Build the checkout at `workdir`
    async fn run(&self, repo: &RepositoryBinding, workdir: &Path) -> Result<LocalBuildResult>;
}
