//! `git` CLI adapter
//!
//! Checkouts live under `workspace_dir/<repository name>` unless the binding
//! names an existing `local_path`. Pull requests go through the Azure DevOps
//! client, so `create_pull_request` needs [`GitCli::with_pull_requests`] and
//! a binding with `ado_repo_id`.
//!
//! Credentials come from the user's git configuration (credential helper or
//! SSH agent); prompts are disabled so a missing credential fails fast.

pub mod security;

#[cfg(test)]
mod tests;

use crate::ado::AdoClient;
use crate::process::{self, CommandOutput, ProcessError};
use async_trait::async_trait;
use conveyor_core::{
    Error, GitService, PullRequest, PullRequestRequest, RepositoryBinding, Result,
};
use security::{is_valid_branch_name, is_valid_clone_url, redact_credentials};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

const SERVICE: &str = "git";

/// stderr fragments that mean the remote could not be reached
const NETWORK_ERRORS: &[&str] = &[
    "could not resolve host",
    "connection timed out",
    "connection refused",
    "connection reset",
    "unable to access",
    "early eof",
    "remote end hung up",
    "operation timed out",
    "http 5",
    "error: 5",
];

/// Settings for [`GitCli`]
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Where managed checkouts are created
    pub workspace_dir: PathBuf,
    /// Commit author name
    pub user_name: String,
    /// Commit author email
    pub user_email: String,
    /// Deadline for any single git command
    pub timeout: Duration,
}

impl GitConfig {
    /// Defaults with checkouts under `workspace_dir`
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            user_name: "Conveyor Agent".to_string(),
            user_email: "conveyor-agent@localhost".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// [`GitService`] backed by the `git` executable
pub struct GitCli {
    config: GitConfig,
    pull_requests: Option<Arc<AdoClient>>,
}

impl GitCli {
    /// Adapter without pull request support
    pub fn new(config: GitConfig) -> Self {
        Self {
            config,
            pull_requests: None,
        }
    }

    /// Open pull requests through `client`
    #[must_use]
    pub fn with_pull_requests(mut self, client: Arc<AdoClient>) -> Self {
        self.pull_requests = Some(client);
        self
    }

    /// Settings
    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    /// Where the checkout of `repo` lives
    pub fn checkout_path(&self, repo: &RepositoryBinding) -> PathBuf {
        repo.local_path
            .clone()
            .unwrap_or_else(|| self.config.workspace_dir.join(&repo.name))
    }

    async fn git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        let mut envs = BTreeMap::new();
        envs.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());

        let output = process::run("git", &args, cwd, &envs, self.config.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::Spawn { .. } => {
                    Error::Configuration(format!("git is not available: {e}"))
                }
                ProcessError::Timeout { .. } => Error::unavailable(SERVICE, e.to_string()),
                ProcessError::Wait { .. } => Error::Internal(e.to_string()),
            })?;

        if output.success {
            debug!(command = %args.first().map(String::as_str).unwrap_or(""), "git ok");
            Ok(output)
        } else {
            Err(command_error(&args, &output))
        }
    }

    /// Clean tree whose HEAD commit carries `message`
    async fn already_committed(&self, path: &Path, message: &str) -> Result<bool> {
        let status = self.git(Some(path), &["status", "--porcelain"]).await?;
        if !status.stdout.trim().is_empty() {
            return Ok(false);
        }
        Ok(match self.git(Some(path), &["log", "-1", "--format=%B"]).await {
            Ok(head) => head.stdout.trim() == message.trim(),
            Err(_) => false,
        })
    }

    fn identity_args(&self) -> [String; 4] {
        [
            "-c".to_string(),
            format!("user.name={}", self.config.user_name),
            "-c".to_string(),
            format!("user.email={}", self.config.user_email),
        ]
    }
}

/// Map a failed git command
pub(crate) fn command_error(args: &[String], output: &CommandOutput) -> Error {
    let stderr = redact_credentials(output.stderr.trim());
    let subcommand = args
        .iter()
        .find(|a| !a.starts_with('-') && !a.contains('='))
        .map(String::as_str)
        .unwrap_or("git");
    let message = format!(
        "git {subcommand} failed (exit code {:?}): {}",
        output.exit_code,
        conveyor_core::utils::text::tail(&stderr, 500)
    );
    let lower = stderr.to_lowercase();
    if NETWORK_ERRORS.iter().any(|p| lower.contains(p)) {
        Error::unavailable(SERVICE, message)
    } else {
        Error::rejected(SERVICE, message)
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Configuration(format!("non UTF-8 path: {}", path.display())))
}

fn check_branch(name: &str) -> Result<()> {
    if is_valid_branch_name(name) {
        Ok(())
    } else {
        Err(Error::validation("branch", format!("unsafe branch name: {name}")))
    }
}

#[async_trait]
impl GitService for GitCli {
    #[instrument(skip(self, repo), fields(repo = %repo.name))]
    async fn clone_or_update(&self, repo: &RepositoryBinding) -> Result<PathBuf> {
        if let Some(local) = &repo.local_path {
            if !local.join(".git").exists() {
                return Err(Error::Configuration(format!(
                    "local_path of {} is not a git checkout: {}",
                    repo.name,
                    local.display()
                )));
            }
            return Ok(local.clone());
        }

        check_branch(&repo.default_branch)?;
        let path = self.checkout_path(repo);
        if path.join(".git").exists() {
            // managed checkouts hold no work worth keeping
            self.git(Some(&path), &["checkout", "-f", repo.default_branch.as_str()])
                .await?;
            self.git(
                Some(&path),
                &["pull", "--ff-only", "origin", repo.default_branch.as_str()],
            )
            .await?;
            info!(path = %path.display(), "Checkout updated");
            return Ok(path);
        }

        if !is_valid_clone_url(&repo.url) {
            return Err(Error::validation(
                "url",
                format!("unsupported clone URL for {}", repo.name),
            ));
        }
        tokio::fs::create_dir_all(&self.config.workspace_dir)
            .await
            .map_err(|e| {
                Error::Configuration(format!(
                    "cannot create workspace {}: {e}",
                    self.config.workspace_dir.display()
                ))
            })?;
        self.git(None, &["clone", "--", repo.url.as_str(), path_arg(&path)?])
            .await?;
        info!(path = %path.display(), "Repository cloned");
        Ok(path)
    }

    #[instrument(skip(self, repo), fields(repo = %repo.name))]
    async fn create_branch(&self, repo: &RepositoryBinding, name: &str) -> Result<()> {
        check_branch(name)?;
        let path = self.checkout_path(repo);
        self.git(Some(&path), &["checkout", "-B", name]).await?;
        Ok(())
    }

    #[instrument(skip(self, repo, message), fields(repo = %repo.name))]
    async fn commit_and_push(
        &self,
        repo: &RepositoryBinding,
        branch: &str,
        message: &str,
    ) -> Result<String> {
        check_branch(branch)?;
        let path = self.checkout_path(repo);
        self.git(Some(&path), &["add", "-A"]).await?;

        // A retry after a failed push finds its own commit at HEAD.
        if !self.already_committed(&path, message).await? {
            let identity = self.identity_args();
            let mut commit: Vec<&str> = identity.iter().map(String::as_str).collect();
            commit.extend(["commit", "--allow-empty", "-m", message]);
            self.git(Some(&path), &commit).await?;
        }

        self.git(Some(&path), &["push", "-u", "origin", branch])
            .await?;
        let head = self.git(Some(&path), &["rev-parse", "HEAD"]).await?;
        let sha = head.stdout.trim().to_string();
        info!(branch, commit = %sha, "Pushed");
        Ok(sha)
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryBinding,
        request: &PullRequestRequest,
    ) -> Result<PullRequest> {
        let client = self.pull_requests.as_ref().ok_or_else(|| {
            Error::Configuration("pull requests need Azure DevOps settings".to_string())
        })?;
        let repository_id = repo.ado_repo_id.as_deref().ok_or_else(|| {
            Error::Configuration(format!("repository {} has no ado_repo_id", repo.name))
        })?;
        check_branch(&request.source_branch)?;
        check_branch(&request.target_branch)?;
        client.create_pull_request(repository_id, request).await
    }
}
