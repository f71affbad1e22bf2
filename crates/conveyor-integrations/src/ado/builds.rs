//! Build endpoints

use super::{branch_ref, short_branch, AdoClient, SERVICE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::{BuildInfo, BuildService, BuildStatus, Error, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

/// Logs read for a failed build, counted from the end
const LOG_TAIL_COUNT: usize = 3;

#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub(crate) value: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DefinitionRef {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Link {
    #[serde(default)]
    pub(crate) href: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BuildLinks {
    #[serde(default)]
    pub(crate) web: Link,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BuildResponse {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) result: Option<String>,
    pub(crate) definition: DefinitionRef,
    #[serde(default)]
    pub(crate) source_branch: String,
    #[serde(default)]
    pub(crate) finish_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "_links")]
    pub(crate) links: BuildLinks,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogRef {
    pub(crate) id: u64,
}

/// Status and result of an Azure DevOps build as one status
pub(crate) fn build_status(status: &str, result: Option<&str>) -> BuildStatus {
    match status {
        "completed" => match result {
            Some("succeeded") => BuildStatus::Succeeded,
            Some("canceled") => BuildStatus::Cancelled,
            // partiallySucceeded still has failing tasks
            _ => BuildStatus::Failed,
        },
        "inProgress" | "cancelling" => BuildStatus::InProgress,
        _ => BuildStatus::NotStarted,
    }
}

impl From<BuildResponse> for BuildInfo {
    fn from(build: BuildResponse) -> Self {
        let logs_ref = Some(build.links.web.href).filter(|href| !href.is_empty());
        BuildInfo {
            id: build.id,
            status: build_status(&build.status, build.result.as_deref()),
            definition: build.definition.name,
            branch: short_branch(&build.source_branch).to_string(),
            logs_ref,
            finished_at: build.finish_time,
        }
    }
}

impl AdoClient {
    /// Resolve a build definition name to its id
    async fn definition_id(&self, name: &str) -> Result<u64> {
        let request = self
            .client
            .get(self.api_url("build/definitions"))
            .query(&[("name", name)]);
        let definitions: ListResponse<DefinitionRef> =
            self.json(request, &format!("build definition {name}")).await?;
        definitions
            .value
            .into_iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .map(|d| d.id)
            .ok_or_else(|| Error::NotFound {
                service: SERVICE.to_string(),
                resource: format!("build definition {name}"),
            })
    }
}

#[async_trait]
impl BuildService for AdoClient {
    #[instrument(skip(self))]
    async fn get(&self, build_id: u64) -> Result<Option<BuildInfo>> {
        let request = self
            .client
            .get(self.api_url(&format!("build/builds/{build_id}")));
        let build: Option<BuildResponse> = self.json_opt(request).await?;
        Ok(build.map(BuildInfo::from))
    }

    #[instrument(skip(self))]
    async fn logs(&self, build_id: u64) -> Result<String> {
        let request = self
            .client
            .get(self.api_url(&format!("build/builds/{build_id}/logs")));
        let Some(list) = self.json_opt::<ListResponse<LogRef>>(request).await? else {
            return Ok(String::new());
        };

        let start = list.value.len().saturating_sub(LOG_TAIL_COUNT);
        let mut text = String::new();
        for log in &list.value[start..] {
            let request = self
                .client
                .get(self.api_url(&format!("build/builds/{build_id}/logs/{}", log.id)))
                .header("Accept", "text/plain");
            if let Some(body) = self.text_opt(request).await? {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&body);
            }
        }
        debug!(build_id, bytes = text.len(), "Fetched build logs");
        Ok(text)
    }

    #[instrument(skip(self))]
    async fn queue(&self, definition: &str, branch: &str) -> Result<u64> {
        let definition_id = self.definition_id(definition).await?;
        let request = self
            .client
            .post(self.api_url("build/builds"))
            .json(&json!({
                "definition": { "id": definition_id },
                "sourceBranch": branch_ref(branch),
            }));
        let build: BuildResponse = self
            .json(request, &format!("build definition {definition}"))
            .await?;
        info!(build_id = build.id, definition, branch, "Build queued");
        Ok(build.id)
    }

    #[instrument(skip(self))]
    async fn latest(&self, definition: &str, branch: &str) -> Result<Option<BuildInfo>> {
        let definition_id = self.definition_id(definition).await?;
        let request = self.client.get(self.api_url("build/builds")).query(&[
            ("definitions", definition_id.to_string()),
            ("branchName", branch_ref(branch)),
            ("$top", "1".to_string()),
            ("queryOrder", "queueTimeDescending".to_string()),
        ]);
        let builds: Option<ListResponse<BuildResponse>> = self.json_opt(request).await?;
        Ok(builds
            .and_then(|list| list.value.into_iter().next())
            .map(BuildInfo::from))
    }
}
