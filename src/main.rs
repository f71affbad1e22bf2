//! Conveyor - delivery agents for Azure DevOps
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use conveyor_core::UserFriendlyError;
use std::process::ExitCode;
use tracing::debug;

mod app;
mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = cli::Cli::parse();

    match start(cli).await {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn start(cli: cli::Cli) -> Result<ExitCode> {
    let config = app::load_config()?;
    let _guard = app::logging::init(&config.logging)?;
    debug!("Conveyor v{}", env!("CARGO_PKG_VERSION"));
    cli::run(cli, config).await
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<conveyor_core::Error>() {
        Some(core) => {
            eprintln!("Error: {}", core.user_message());
            if let Some(suggestion) = core.suggestion() {
                eprintln!("Hint: {suggestion}");
            }
        }
        None => eprintln!("Error: {error:#}"),
    }
}
