//! `conveyor memory`

use super::print_json;
use crate::app::{open_memory, AppConfig};
use anyhow::{Context, Result};
use clap::Subcommand;
use conveyor_memory::{MemoryKind, RecentQuery};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    /// Most recent entries of an agent, newest first
    Recent {
        /// Agent id, e.g. `orchestrator` or `code_repo_backend`
        agent: String,
        /// Only this kind (observation, decision, action, result, reflection)
        #[arg(short, long)]
        kind: Option<String>,
        #[arg(short = 'n', long, default_value_t = RecentQuery::DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Entries whose content contains a phrase
    Search {
        query: String,
        /// Restrict to one agent
        #[arg(short, long)]
        agent: Option<String>,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Action statistics of an agent
    Stats {
        agent: String,
        /// Only this action type; per action type when omitted
        #[arg(short, long)]
        action: Option<String>,
    },
    /// Delete records older than the retention window
    Purge {
        /// Override the retention window
        #[arg(long)]
        older_than_days: Option<u64>,
    },
}

pub async fn run(config: AppConfig, command: MemoryCommand) -> Result<ExitCode> {
    let memory = open_memory(&config).await?;
    match command {
        MemoryCommand::Recent { agent, kind, limit } => {
            let mut query = RecentQuery::new(agent).limit(limit);
            if let Some(kind) = kind {
                let kind: MemoryKind = kind.parse().context("Unknown memory kind")?;
                query = query.kind(kind);
            }
            print_json(&memory.recent(&query).await)?;
        }
        MemoryCommand::Search {
            query,
            agent,
            limit,
        } => {
            print_json(&memory.search(&query, agent.as_deref(), limit).await)?;
        }
        MemoryCommand::Stats { agent, action } => match action {
            Some(action) => print_json(&memory.statistics(&agent, Some(&action)).await)?,
            None => print_json(&memory.statistics_by_action(&agent).await)?,
        },
        MemoryCommand::Purge { older_than_days } => {
            let report = match older_than_days {
                Some(days) => {
                    memory
                        .purge_older_than(Duration::from_secs(days.saturating_mul(86_400)))
                        .await?
                }
                None => memory.purge_expired().await?,
            };
            print_json(&report)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
