//! Pull request endpoints

use super::builds::ListResponse;
use super::{branch_ref, short_branch, AdoClient};
use conveyor_core::{PullRequest, PullRequestRequest, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RepositoryRef {
    #[serde(default)]
    pub(crate) web_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PullRequestResponse {
    pub(crate) pull_request_id: u64,
    #[serde(default)]
    pub(crate) source_ref_name: String,
    #[serde(default)]
    pub(crate) target_ref_name: String,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) repository: RepositoryRef,
}

impl From<PullRequestResponse> for PullRequest {
    fn from(pr: PullRequestResponse) -> Self {
        let url = format!(
            "{}/pullrequest/{}",
            pr.repository.web_url.trim_end_matches('/'),
            pr.pull_request_id
        );
        PullRequest {
            id: pr.pull_request_id,
            url,
            source_branch: short_branch(&pr.source_ref_name).to_string(),
            target_branch: short_branch(&pr.target_ref_name).to_string(),
            title: pr.title,
        }
    }
}

/// Request body for a new pull request
pub(crate) fn pull_request_body(request: &PullRequestRequest) -> Value {
    let work_items: Vec<Value> = request
        .work_item_ids
        .iter()
        .map(|id| json!({ "id": id.to_string() }))
        .collect();
    json!({
        "sourceRefName": branch_ref(&request.source_branch),
        "targetRefName": branch_ref(&request.target_branch),
        "title": request.title,
        "description": request.description,
        "workItemRefs": work_items,
    })
}

/// Query selecting active pull requests between the request's branches
pub(crate) fn pull_request_search(request: &PullRequestRequest) -> [(&'static str, String); 3] {
    [
        ("searchCriteria.sourceRefName", branch_ref(&request.source_branch)),
        ("searchCriteria.targetRefName", branch_ref(&request.target_branch)),
        ("searchCriteria.status", "active".to_string()),
    ]
}

impl AdoClient {
    /// Active pull request between the request's branches, if one is open
    pub async fn find_pull_request(
        &self,
        repository_id: &str,
        request: &PullRequestRequest,
    ) -> Result<Option<PullRequest>> {
        let http = self
            .client
            .get(self.api_url(&format!("git/repositories/{repository_id}/pullrequests")))
            .query(&pull_request_search(request));
        let open: ListResponse<PullRequestResponse> = self
            .json(http, &format!("repository {repository_id}"))
            .await?;
        Ok(open.value.into_iter().next().map(PullRequest::from))
    }

    /// Open a pull request in the git repository `repository_id`.
    ///
    /// An active pull request for the same branches is returned instead of
    /// opening a second one, so the call can be retried.
    #[instrument(skip(self, request), fields(source = %request.source_branch))]
    pub async fn create_pull_request(
        &self,
        repository_id: &str,
        request: &PullRequestRequest,
    ) -> Result<PullRequest> {
        if let Some(existing) = self.find_pull_request(repository_id, request).await? {
            info!(id = existing.id, "Pull request already open");
            return Ok(existing);
        }
        let http = self
            .client
            .post(self.api_url(&format!("git/repositories/{repository_id}/pullrequests")))
            .json(&pull_request_body(request));
        let created: PullRequestResponse = self
            .json(http, &format!("repository {repository_id}"))
            .await?;
        let pr = PullRequest::from(created);
        info!(id = pr.id, url = %pr.url, "Pull request created");
        Ok(pr)
    }
}
