//! Azure DevOps REST client
//!
//! Implements [`WorkItemService`](conveyor_core::WorkItemService) and
//! [`BuildService`](conveyor_core::BuildService), and opens pull requests
//! for the git adapter. Authentication is a personal access token sent as
//! HTTP basic auth; every call pins `api-version=7.1`.
//!
//! Failures map onto the core error model:
//! - connect errors, timeouts, 429 and 5xx → `CollaboratorUnavailable`
//! - 404 → `NotFound` (or `None` where the trait allows it)
//! - other 4xx and undecodable bodies → `Collaborator`

mod builds;
mod pull_requests;
mod work_items;

#[cfg(test)]
mod tests;

use conveyor_core::{Error, Result};
use conveyor_llm::util::mask_api_key;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// REST API version used for every call
pub const API_VERSION: &str = "7.1";

/// Default service URL
pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";

const SERVICE: &str = "azure_devops";

/// Azure DevOps connection settings
pub struct AdoConfig {
    /// Organization name
    pub organization: String,
    /// Project name
    pub project: String,
    /// Personal access token
    pub pat: SecretString,
    /// Service URL, without organization
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for AdoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdoConfig")
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("pat", &mask_api_key(self.pat.expose_secret()))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AdoConfig {
    /// Settings for `organization`/`project` on dev.azure.com
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        pat: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            project: project.into(),
            pat: SecretString::from(pat.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the service URL (Azure DevOps Server installations)
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Azure DevOps client
#[derive(Debug)]
pub struct AdoClient {
    client: Client,
    config: AdoConfig,
}

impl AdoClient {
    /// Create a client; organization, project and token are required
    pub fn new(config: AdoConfig) -> Result<Self> {
        if config.organization.trim().is_empty() || config.project.trim().is_empty() {
            return Err(Error::Configuration(
                "Azure DevOps organization and project are required".to_string(),
            ));
        }
        if config.pat.expose_secret().trim().is_empty() {
            return Err(Error::Configuration(
                "Azure DevOps personal access token is empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("conveyor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Connection settings
    pub fn config(&self) -> &AdoConfig {
        &self.config
    }

    /// `{base}/{organization}`
    fn org_url(&self) -> String {
        format!("{}/{}", self.config.base_url, self.config.organization)
    }

    /// `{base}/{organization}/{project}/_apis/{path}`
    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}/_apis/{}",
            self.org_url(),
            self.config.project,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth("", Some(self.config.pat.expose_secret()))
            .query(&[("api-version", API_VERSION)])
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        debug!(status = %response.status(), url = %response.url(), "Azure DevOps response");
        Ok(response)
    }

    /// Send and decode a JSON body; `Ok(None)` on 404.
    async fn json_opt<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let response = self.send(request).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await.map_err(|e| transport_error(&e))?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| Error::rejected(SERVICE, format!("unexpected response: {e}")))
    }

    /// Send and decode a JSON body; 404 becomes `NotFound { resource }`.
    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder, resource: &str) -> Result<T> {
        self.json_opt(request).await?.ok_or_else(|| Error::NotFound {
            service: SERVICE.to_string(),
            resource: resource.to_string(),
        })
    }

    /// Send and return the body as text; `Ok(None)` on 404.
    async fn text_opt(&self, request: RequestBuilder) -> Result<Option<String>> {
        let response = self.send(request).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await.map_err(|e| transport_error(&e))?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(Some(body))
    }
}

/// Map a transport failure; they are all worth retrying.
pub(crate) fn transport_error(error: &reqwest::Error) -> Error {
    let message = if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        // reqwest errors carry the URL, which has no credentials here
        error.to_string()
    };
    Error::unavailable(SERVICE, message)
}

/// Map a non-success HTTP status.
pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    let detail = error_message(body).unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::NOT_FOUND => Error::NotFound {
            service: SERVICE.to_string(),
            resource: detail,
        },
        StatusCode::TOO_MANY_REQUESTS => Error::unavailable(SERVICE, format!("rate limited: {detail}")),
        s if s.is_server_error() => Error::unavailable(SERVICE, format!("{s}: {detail}")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::rejected(
            SERVICE,
            format!("{status}: check the personal access token and its scopes"),
        ),
        s => Error::rejected(SERVICE, format!("{s}: {detail}")),
    }
}

/// `message` of an Azure DevOps error body
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// `refs/heads/<branch>` for a short branch name
pub(crate) fn branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

/// Short branch name for `refs/heads/<branch>`
pub(crate) fn short_branch(reference: &str) -> &str {
    reference.strip_prefix("refs/heads/").unwrap_or(reference)
}
