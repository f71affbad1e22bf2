//! `conveyor config`

use crate::app::AppConfig;
use anyhow::Result;
use clap::Subcommand;
use std::process::ExitCode;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration with secrets masked
    Show,
}

pub fn run(config: &AppConfig, command: ConfigCommand) -> Result<ExitCode> {
    match command {
        ConfigCommand::Show => {
            println!("# data_dir resolves to {}", config.data_dir().display());
            println!("# memory database: {}", config.memory_path().display());
            println!("# workspace: {}", config.workspace_dir().display());
            println!();
            print!("{}", config.to_redacted_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
