//! Orchestrator - task dispatch and aggregation
//!
//! # Module Structure
//!
//! - `types`: task, sub-task and execution types
//! - `validation`: parameter checks run before any collaborator call
//! - `core`: `Orchestrator` struct, wiring and cancellation
//! - `dispatch`: `implement_story`, `split_feature`, `create_release`
//! - `fix_router`: escalation handler routing build fixes to code flows

mod core;
mod dispatch;
mod fix_router;
mod types;
mod validation;

#[cfg(test)]
mod tests;

pub use core::{Collaborators, Orchestrator, MAX_KEPT_EXECUTIONS, ORCHESTRATOR_AGENT_ID};
pub use dispatch::RELEASE_BLOCKED;
pub use types::{
    SubTask, SubTaskDetail, SubTaskFailure, SubTaskStatus, TaskExecution, TaskParameters,
    TaskStatus, TaskType,
};
pub use validation::{DEFAULT_SOURCE_BRANCH, DEFAULT_STORY_COUNT, MAX_STORY_COUNT};
