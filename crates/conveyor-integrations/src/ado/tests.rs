use super::builds::{build_status, BuildResponse, ListResponse};
use super::pull_requests::{pull_request_body, pull_request_search, PullRequestResponse};
use super::work_items::{field_patch, strip_html, WorkItemResponse};
use super::*;
use conveyor_core::{
    BuildInfo, BuildService, BuildStatus, Fields, PullRequest, PullRequestRequest, WorkItem,
    WorkItemService,
};
use serde_json::json;

fn client() -> AdoClient {
    AdoClient::new(AdoConfig::new("acme", "shop", "pat-123")).unwrap()
}

#[test]
fn test_new_requires_settings() {
    let err = AdoClient::new(AdoConfig::new("", "shop", "pat")).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    let err = AdoClient::new(AdoConfig::new("acme", "shop", "  ")).unwrap_err();
    assert!(matches!(err, Error::Configuration(ref m) if m.contains("token")));
}

#[test]
fn test_debug_masks_token() {
    let config = AdoConfig::new("acme", "shop", "abcdefghijklmnopqrstuvwxyz");
    let debug = format!("{config:?}");
    assert!(debug.contains("acme"));
    assert!(!debug.contains("abcdefghijklmnopqrstuvwxyz"));

    let client = AdoClient::new(config).unwrap();
    assert!(!format!("{client:?}").contains("abcdefghijklmnopqrstuvwxyz"));
}

#[test]
fn test_urls() {
    let client = AdoClient::new(
        AdoConfig::new("acme", "shop", "pat").with_base_url("https://ado.internal/tfs/"),
    )
    .unwrap();
    assert_eq!(client.org_url(), "https://ado.internal/tfs/acme");
    assert_eq!(
        client.api_url("/build/builds/7"),
        "https://ado.internal/tfs/acme/shop/_apis/build/builds/7"
    );
}

#[test]
fn test_branch_refs() {
    assert_eq!(branch_ref("main"), "refs/heads/main");
    assert_eq!(branch_ref("refs/heads/release/R-1"), "refs/heads/release/R-1");
    assert_eq!(short_branch("refs/heads/feature/1-x"), "feature/1-x");
    assert_eq!(short_branch("main"), "main");
}

#[test]
fn test_status_errors() {
    let err = status_error(StatusCode::NOT_FOUND, r#"{"message":"TF401232: Work item 9 does not exist"}"#);
    assert!(matches!(err, Error::NotFound { ref resource, .. } if resource.contains("TF401232")));

    assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
    assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_transient());

    let err = status_error(StatusCode::UNAUTHORIZED, "<html>sign in</html>");
    assert!(!err.is_transient());
    assert!(err.to_string().contains("personal access token"));

    let err = status_error(StatusCode::BAD_REQUEST, r#"{"message":"VS402371: bad field"}"#);
    assert!(matches!(err, Error::Collaborator { ref message, .. } if message.contains("VS402371")));
}

#[test]
fn test_work_item_mapping() {
    let response: WorkItemResponse = serde_json::from_value(json!({
        "id": 12345,
        "rev": 4,
        "fields": {
            "System.WorkItemType": "User Story",
            "System.Title": "Add login page",
            "System.State": "Active",
            "System.Description": "<div>Users sign in with <b>SSO</b>.</div><div>Remember&nbsp;me option</div>",
            "Microsoft.VSTS.Common.AcceptanceCriteria": "<ul><li>SSO works</li><li>Errors shown</li></ul>",
            "Microsoft.VSTS.Common.Priority": 2
        }
    }))
    .unwrap();

    let item = WorkItem::from(response);
    assert_eq!(item.id, 12345);
    assert_eq!(item.item_type, "User Story");
    assert_eq!(item.title, "Add login page");
    assert_eq!(item.state, "Active");
    assert_eq!(item.description, "Users sign in with SSO.\nRemember me option");
    assert_eq!(item.acceptance_criteria, "SSO works\nErrors shown");
    assert_eq!(item.fields["Microsoft.VSTS.Common.Priority"], json!(2));
}

#[test]
fn test_field_patch() {
    let mut fields = Fields::new();
    fields.insert("System.State".into(), json!("Resolved"));
    fields.insert("System.Tags".into(), json!("automated"));

    let patch = serde_json::to_value(field_patch(&fields)).unwrap();
    assert_eq!(
        patch,
        json!([
            { "op": "add", "path": "/fields/System.State", "value": "Resolved" },
            { "op": "add", "path": "/fields/System.Tags", "value": "automated" }
        ])
    );
}

#[test]
fn test_strip_html_entities() {
    assert_eq!(strip_html("a &lt;b&gt; &amp; c"), "a <b> & c");
    assert_eq!(strip_html("plain text"), "plain text");
    assert_eq!(strip_html(""), "");
}

#[test]
fn test_build_status_mapping() {
    assert_eq!(build_status("completed", Some("succeeded")), BuildStatus::Succeeded);
    assert_eq!(build_status("completed", Some("failed")), BuildStatus::Failed);
    assert_eq!(
        build_status("completed", Some("partiallySucceeded")),
        BuildStatus::Failed
    );
    assert_eq!(build_status("completed", Some("canceled")), BuildStatus::Cancelled);
    assert_eq!(build_status("inProgress", None), BuildStatus::InProgress);
    assert_eq!(build_status("cancelling", None), BuildStatus::InProgress);
    assert_eq!(build_status("notStarted", None), BuildStatus::NotStarted);
    assert_eq!(build_status("postponed", None), BuildStatus::NotStarted);
}

#[test]
fn test_build_mapping() {
    let list: ListResponse<BuildResponse> = serde_json::from_value(json!({
        "count": 1,
        "value": [{
            "id": 501,
            "buildNumber": "20261019.3",
            "status": "completed",
            "result": "failed",
            "definition": { "id": 12, "name": "backend-ci" },
            "sourceBranch": "refs/heads/feature/12345-add-login",
            "finishTime": "2026-10-19T08:30:00Z",
            "_links": { "web": { "href": "https://dev.azure.com/acme/shop/_build/results?buildId=501" } }
        }]
    }))
    .unwrap();

    let info = BuildInfo::from(list.value.into_iter().next().unwrap());
    assert_eq!(info.id, 501);
    assert_eq!(info.status, BuildStatus::Failed);
    assert_eq!(info.definition, "backend-ci");
    assert_eq!(info.branch, "feature/12345-add-login");
    assert!(info.logs_ref.unwrap().ends_with("buildId=501"));
    assert!(info.finished_at.is_some());
}

#[test]
fn test_running_build_has_no_finish_time() {
    let build: BuildResponse = serde_json::from_value(json!({
        "id": 502,
        "status": "inProgress",
        "definition": { "id": 12, "name": "backend-ci" },
        "sourceBranch": "refs/heads/main"
    }))
    .unwrap();

    let info = BuildInfo::from(build);
    assert_eq!(info.status, BuildStatus::InProgress);
    assert_eq!(info.logs_ref, None);
    assert_eq!(info.finished_at, None);
}

#[test]
fn test_pull_request_mapping() {
    let request = PullRequestRequest {
        source_branch: "feature/12345-add-login".into(),
        target_branch: "main".into(),
        title: "[12345] Add login page".into(),
        description: "Implements work item #12345".into(),
        work_item_ids: vec![12345],
    };
    let body = pull_request_body(&request);
    assert_eq!(body["sourceRefName"], "refs/heads/feature/12345-add-login");
    assert_eq!(body["targetRefName"], "refs/heads/main");
    assert_eq!(body["workItemRefs"], json!([{ "id": "12345" }]));

    let response: PullRequestResponse = serde_json::from_value(json!({
        "pullRequestId": 88,
        "status": "active",
        "title": "[12345] Add login page",
        "sourceRefName": "refs/heads/feature/12345-add-login",
        "targetRefName": "refs/heads/main",
        "repository": { "id": "r-1", "webUrl": "https://dev.azure.com/acme/shop/_git/backend" }
    }))
    .unwrap();
    let pr = PullRequest::from(response);
    assert_eq!(pr.id, 88);
    assert_eq!(pr.url, "https://dev.azure.com/acme/shop/_git/backend/pullrequest/88");
    assert_eq!(pr.source_branch, "feature/12345-add-login");
    assert_eq!(pr.target_branch, "main");
}

#[test]
fn test_open_pull_request_lookup() {
    let request = PullRequestRequest {
        source_branch: "feature/12345-add-login".into(),
        target_branch: "main".into(),
        title: "[12345] Add login page".into(),
        description: String::new(),
        work_item_ids: vec![12345],
    };
    let query = pull_request_search(&request);
    assert_eq!(query[0], ("searchCriteria.sourceRefName", "refs/heads/feature/12345-add-login".to_string()));
    assert_eq!(query[1], ("searchCriteria.targetRefName", "refs/heads/main".to_string()));
    assert_eq!(query[2], ("searchCriteria.status", "active".to_string()));

    let open: ListResponse<PullRequestResponse> = serde_json::from_value(json!({
        "count": 1,
        "value": [{
            "pullRequestId": 91,
            "sourceRefName": "refs/heads/feature/12345-add-login",
            "targetRefName": "refs/heads/main",
            "repository": { "webUrl": "https://dev.azure.com/acme/shop/_git/backend" }
        }]
    }))
    .unwrap();
    let existing = open.value.into_iter().next().map(PullRequest::from).unwrap();
    assert_eq!(existing.id, 91);
    assert_eq!(existing.url, "https://dev.azure.com/acme/shop/_git/backend/pullrequest/91");
}

#[tokio::test]
async fn test_unreachable_service_is_transient() {
    let client = AdoClient::new(
        AdoConfig::new("acme", "shop", "pat")
            .with_base_url("http://127.0.0.1:1")
            .with_timeout(std::time::Duration::from_secs(5)),
    )
    .unwrap();

    let err = WorkItemService::get(&client, 1).await.unwrap_err();
    assert!(matches!(err, Error::CollaboratorUnavailable { .. }), "{err:?}");
    let err = BuildService::get(&client, 1).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_create_requires_title() {
    let err = client()
        .create("Task", "  ", "", &Fields::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "title"));
}
