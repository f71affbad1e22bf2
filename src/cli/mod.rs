//! CLI module for Conveyor
//!
//! - task commands: `implement-story`, `split-feature`, `create-release`,
//!   `monitor-build`
//! - `memory`: inspect and purge agent memory
//! - `repos`: list and validate repository bindings
//! - `config show` and `doctor`

use clap::{Parser, Subcommand};
use std::process::ExitCode;

pub mod config;
pub mod doctor;
pub mod memory;
pub mod repos;
pub mod task;

/// Conveyor delivery agents
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(about = "Agent orchestration for story implementation, feature splitting and releases")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Implement a user story in one or more repositories
    ImplementStory(task::ImplementStoryArgs),
    /// Split a feature into user stories
    SplitFeature(task::SplitFeatureArgs),
    /// Gate and create a release across components
    CreateRelease(task::CreateReleaseArgs),
    /// Track an existing CI build until it finishes
    MonitorBuild(task::MonitorBuildArgs),
    /// Inspect agent memory
    #[command(subcommand)]
    Memory(memory::MemoryCommand),
    /// Repository bindings
    #[command(subcommand)]
    Repos(repos::ReposCommand),
    /// Configuration
    #[command(subcommand)]
    Config(config::ConfigCommand),
    /// Check configuration and collaborator connectivity
    Doctor,
}

/// Run the CLI command
pub async fn run(cli: Cli, app_config: crate::app::AppConfig) -> anyhow::Result<ExitCode> {
    match cli.command {
        Some(Commands::ImplementStory(args)) => task::implement_story(app_config, args).await,
        Some(Commands::SplitFeature(args)) => task::split_feature(app_config, args).await,
        Some(Commands::CreateRelease(args)) => task::create_release(app_config, args).await,
        Some(Commands::MonitorBuild(args)) => task::monitor_build(app_config, args).await,
        Some(Commands::Memory(command)) => memory::run(app_config, command).await,
        Some(Commands::Repos(command)) => repos::run(&app_config, command),
        Some(Commands::Config(command)) => config::run(&app_config, command),
        Some(Commands::Doctor) => doctor::run(&app_config).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print `value` as pretty JSON on stdout
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
