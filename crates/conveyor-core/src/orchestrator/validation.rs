//! Parameter validation, done before any collaborator is contacted

use super::types::{TaskParameters, TaskType};
use crate::error::{Error, Result};
use crate::repository::{RepositoryBinding, RepositoryCatalog};

/// Stories a feature may be split into
pub const MAX_STORY_COUNT: u32 = 20;
/// Stories when no count is given
pub const DEFAULT_STORY_COUNT: u32 = 3;
/// Release source branch when none is given
pub const DEFAULT_SOURCE_BRANCH: &str = "main";

/// A dispatch request whose parameters passed validation
#[derive(Debug, Clone)]
pub(crate) enum ValidatedTask {
    ImplementStory {
        story_id: u64,
        repositories: Vec<RepositoryBinding>,
    },
    SplitFeature {
        feature_id: u64,
        story_count: u32,
    },
    CreateRelease {
        components: Vec<RepositoryBinding>,
        source_branch: String,
        release_name: Option<String>,
    },
}

pub(crate) fn validate(
    task_type: TaskType,
    params: &TaskParameters,
    catalog: &RepositoryCatalog,
) -> Result<ValidatedTask> {
    match task_type {
        TaskType::ImplementStory => {
            let story_id = required_id("story_id", params.story_id)?;
            let repositories = if params.repositories.is_empty() {
                catalog.enabled().cloned().collect()
            } else {
                catalog.resolve("repositories", &params.repositories)?
            };
            if repositories.is_empty() {
                return Err(Error::validation(
                    "repositories",
                    "at least one enabled repository is required",
                ));
            }
            Ok(ValidatedTask::ImplementStory {
                story_id,
                repositories,
            })
        }
        TaskType::SplitFeature => {
            let feature_id = required_id("feature_id", params.feature_id)?;
            let story_count = params.story_count.unwrap_or(DEFAULT_STORY_COUNT);
            if !(1..=MAX_STORY_COUNT).contains(&story_count) {
                return Err(Error::validation(
                    "story_count",
                    format!("must be between 1 and {MAX_STORY_COUNT}, got {story_count}"),
                ));
            }
            Ok(ValidatedTask::SplitFeature {
                feature_id,
                story_count,
            })
        }
        TaskType::CreateRelease => {
            if params.components.is_empty() {
                return Err(Error::validation(
                    "components",
                    "at least one component is required",
                ));
            }
            let components = catalog.resolve("components", &params.components)?;
            let source_branch = match params.source_branch.as_deref().map(str::trim) {
                None => DEFAULT_SOURCE_BRANCH.to_string(),
                Some("") => {
                    return Err(Error::validation("source_branch", "must not be empty"));
                }
                Some(branch) => branch.to_string(),
            };
            let release_name = params
                .release_name
                .as_deref()
                .map(validate_release_name)
                .transpose()?;
            Ok(ValidatedTask::CreateRelease {
                components,
                source_branch,
                release_name,
            })
        }
    }
}

fn required_id(field: &str, id: Option<u64>) -> Result<u64> {
    match id {
        Some(id) if id > 0 => Ok(id),
        Some(_) => Err(Error::validation(field, "must be a positive work item id")),
        None => Err(Error::validation(field, "is required")),
    }
}

/// Release names end up in branch names.
fn validate_release_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("release_name", "must not be empty"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
    {
        return Err(Error::validation(
            "release_name",
            format!("invalid character '{bad}'"),
        ));
    }
    Ok(name.to_string())
}
