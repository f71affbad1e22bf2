//! Work item tracking endpoints

use super::{AdoClient, SERVICE};
use async_trait::async_trait;
use conveyor_core::{Error, Fields, Result, WorkItem, WorkItemService};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::{info, instrument, warn};

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("HTML_TAG is a compile-time constant"));

/// Work item type used for stories created by a feature split
pub const STORY_TYPE: &str = "User Story";

#[derive(Debug, Deserialize)]
pub(crate) struct WorkItemResponse {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PatchOperation {
    op: &'static str,
    path: String,
    value: Value,
}

impl PatchOperation {
    fn field(name: &str, value: Value) -> Self {
        Self {
            op: "add",
            path: format!("/fields/{name}"),
            value,
        }
    }

    fn parent_link(url: String) -> Self {
        Self {
            op: "add",
            path: "/relations/-".to_string(),
            value: json!({ "rel": "System.LinkTypes.Hierarchy-Reverse", "url": url }),
        }
    }
}

/// JSON patch document setting `fields`
pub(crate) fn field_patch(fields: &Fields) -> Vec<PatchOperation> {
    fields
        .iter()
        .map(|(name, value)| PatchOperation::field(name, value.clone()))
        .collect()
}

fn text_field(fields: &serde_json::Map<String, Value>, name: &str) -> String {
    match fields.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Rich-text fields come back as HTML.
pub(crate) fn strip_html(html: &str) -> String {
    let text = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n")
        .replace("</div>", "\n")
        .replace("</li>", "\n");
    let text = HTML_TAG.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

impl From<WorkItemResponse> for WorkItem {
    fn from(response: WorkItemResponse) -> Self {
        let fields = &response.fields;
        WorkItem {
            id: response.id,
            item_type: text_field(fields, "System.WorkItemType"),
            title: text_field(fields, "System.Title"),
            description: strip_html(&text_field(fields, "System.Description")),
            state: text_field(fields, "System.State"),
            acceptance_criteria: strip_html(&text_field(
                fields,
                "Microsoft.VSTS.Common.AcceptanceCriteria",
            )),
            fields: response
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl AdoClient {
    async fn create_item(&self, item_type: &str, document: &[PatchOperation]) -> Result<u64> {
        let request = self
            .client
            .post(self.api_url(&format!("wit/workitems/${item_type}")))
            .header("Content-Type", "application/json-patch+json")
            .json(document);
        let created: WorkItemResponse = self
            .json(request, &format!("work item type {item_type}"))
            .await?;
        Ok(created.id)
    }

    fn work_item_url(&self, id: u64) -> String {
        format!("{}/_apis/wit/workItems/{id}", self.org_url())
    }
}

#[async_trait]
impl WorkItemService for AdoClient {
    #[instrument(skip(self))]
    async fn get(&self, id: u64) -> Result<WorkItem> {
        let request = self
            .client
            .get(self.api_url(&format!("wit/workitems/{id}")))
            .query(&[("$expand", "all")]);
        let response: WorkItemResponse = self.json(request, &format!("work item {id}")).await?;
        Ok(response.into())
    }

    #[instrument(skip(self, fields), fields(count = fields.len()))]
    async fn update(&self, id: u64, fields: &Fields) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let request = self
            .client
            .patch(self.api_url(&format!("wit/workitems/{id}")))
            .header("Content-Type", "application/json-patch+json")
            .json(&field_patch(fields));
        let _: WorkItemResponse = self.json(request, &format!("work item {id}")).await?;
        Ok(())
    }

    #[instrument(skip(self, description, fields))]
    async fn create(
        &self,
        item_type: &str,
        title: &str,
        description: &str,
        fields: &Fields,
    ) -> Result<u64> {
        if title.trim().is_empty() {
            return Err(Error::validation("title", "work item title is required"));
        }
        let mut document = vec![
            PatchOperation::field("System.Title", json!(title)),
            PatchOperation::field("System.Description", json!(description)),
        ];
        document.extend(field_patch(fields));
        let id = self.create_item(item_type, &document).await?;
        info!(id, item_type, "Work item created");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn split(&self, id: u64, count: u32) -> Result<Vec<u64>> {
        let feature = WorkItemService::get(self, id).await?;
        let mut story_ids = Vec::with_capacity(count as usize);
        for part in 1..=count {
            let document = vec![
                PatchOperation::field(
                    "System.Title",
                    json!(format!("{} - Story {part}", feature.title)),
                ),
                PatchOperation::field(
                    "System.Description",
                    json!(format!("Part {part} of {count} for feature {id}")),
                ),
                PatchOperation::parent_link(self.work_item_url(id)),
            ];
            match self.create_item(STORY_TYPE, &document).await {
                Ok(story_id) => story_ids.push(story_id),
                // stories created so far stay linked to the feature
                Err(e) if story_ids.is_empty() => return Err(e),
                Err(e) => {
                    warn!(feature_id = id, part, error = %e, "Stopped splitting feature");
                    break;
                }
            }
        }
        info!(feature_id = id, stories = story_ids.len(), service = SERVICE, "Feature split");
        Ok(story_ids)
    }
}
