//! Conveyor Integrations - adapters behind the core's collaborator traits
//!
//! - [`ado`]: Azure DevOps REST client (work items, builds, pull requests)
//! - [`git`]: `git` CLI adapter for clones, branches, commits and pushes
//! - [`maven`]: local build tool running Maven or a custom command
//! - [`process`]: child process execution with a timeout

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ado;
pub mod git;
pub mod maven;
pub mod process;

pub use ado::{AdoClient, AdoConfig};
pub use git::{GitCli, GitConfig};
pub use maven::{MavenBuildTool, MavenConfig};
pub use process::{CommandOutput, ProcessError};
