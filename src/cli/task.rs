//! Task commands

use super::print_json;
use crate::app::{App, AppConfig};
use anyhow::Result;
use clap::Args;
use conveyor_core::{TaskExecution, TaskParameters, TaskStatus, TaskType};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Args, Debug)]
pub struct ImplementStoryArgs {
    /// User story work item id
    pub work_item_id: u64,
    /// Repositories or component groups; all enabled repositories when omitted
    #[arg(short, long, value_delimiter = ',')]
    pub repositories: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SplitFeatureArgs {
    /// Feature work item id
    pub feature_id: u64,
    /// Number of stories (1-20, default 3)
    #[arg(short = 'n', long)]
    pub stories: Option<u32>,
}

#[derive(Args, Debug)]
pub struct CreateReleaseArgs {
    /// Repositories or component groups to release
    #[arg(required = true, value_delimiter = ',')]
    pub components: Vec<String>,
    /// Branch the release is cut from (default: main)
    #[arg(long)]
    pub source_branch: Option<String>,
    /// Release name (default: Release-YYYY.MM.DD)
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct MonitorBuildArgs {
    /// CI build id
    pub build_id: u64,
    /// Repository the build belongs to; looked up by build definition when omitted
    #[arg(short, long)]
    pub repository: Option<String>,
}

/// Process exit status for a finished task
pub(crate) fn exit_status(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Succeeded => 0,
        TaskStatus::PartialFailure => 2,
        _ => 1,
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

async fn dispatch(config: AppConfig, task_type: TaskType, params: TaskParameters) -> Result<ExitCode> {
    let app = App::build(config).await?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let sweeper = app
        .memory
        .spawn_retention_sweeper(SWEEP_INTERVAL, cancel.child_token());

    let result = app
        .orchestrator
        .dispatch_with_token(task_type, params, cancel.clone())
        .await;
    cancel.cancel();
    let _ = sweeper.await;

    let execution: TaskExecution = result?;
    print_json(&execution)?;
    Ok(ExitCode::from(exit_status(execution.status)))
}

pub async fn implement_story(config: AppConfig, args: ImplementStoryArgs) -> Result<ExitCode> {
    let params = TaskParameters {
        story_id: Some(args.work_item_id),
        repositories: args.repositories,
        ..TaskParameters::default()
    };
    dispatch(config, TaskType::ImplementStory, params).await
}

pub async fn split_feature(config: AppConfig, args: SplitFeatureArgs) -> Result<ExitCode> {
    let params = TaskParameters::split_feature(args.feature_id, args.stories);
    dispatch(config, TaskType::SplitFeature, params).await
}

pub async fn create_release(config: AppConfig, args: CreateReleaseArgs) -> Result<ExitCode> {
    let params = TaskParameters {
        components: args.components,
        source_branch: args.source_branch,
        release_name: args.name,
        ..TaskParameters::default()
    };
    dispatch(config, TaskType::CreateRelease, params).await
}

pub async fn monitor_build(config: AppConfig, args: MonitorBuildArgs) -> Result<ExitCode> {
    let app = App::build(config).await?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let report = app
        .orchestrator
        .monitor_build(args.build_id, args.repository.as_deref(), &cancel)
        .await?;
    print_json(&report)?;
    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(TaskStatus::Succeeded), 0);
        assert_eq!(exit_status(TaskStatus::PartialFailure), 2);
        assert_eq!(exit_status(TaskStatus::Failed), 1);
    }
}
