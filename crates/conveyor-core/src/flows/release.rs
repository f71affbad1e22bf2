//! Release readiness gate and release creation

use crate::agent::{metadata, AgentContext};
use crate::build_monitor::{BuildRegistry, BuildState};
use crate::collaborators::{BuildService, BuildStatus, Fields, WorkItemService};
use crate::error::{Error, Result, UserFriendlyError};
use crate::repository::RepositoryBinding;
use crate::utils::{call_with_backoff, RetryConfig};
use chrono::Utc;
use conveyor_llm::LlmProvider;
use conveyor_memory::Memory;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Agent id of the release flow
pub const RELEASE_MANAGER_AGENT_ID: &str = "release_manager";

const SYSTEM_PROMPT: &str = "You are the Release Manager agent. You create release work items, \
plan release branches, make sure every component has a passing build before a release \
and write concise release notes.";

/// Readiness of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReadiness {
    /// Repository name
    pub component: String,
    /// Whether the component may be released
    pub ready: bool,
    /// Build the verdict is based on
    pub build_id: Option<u64>,
    /// State or status of that build
    pub state: Option<String>,
    /// Reasons the component is blocked
    pub issues: Vec<String>,
}

/// Readiness of a set of components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    /// True when every component is ready
    pub ready: bool,
    /// Per-component verdicts, in request order
    pub components: Vec<ComponentReadiness>,
}

impl ReadinessReport {
    /// Names of the components blocking the release
    pub fn blocking(&self) -> Vec<String> {
        self.components
            .iter()
            .filter(|c| !c.ready)
            .map(|c| c.component.clone())
            .collect()
    }
}

/// Planned release branch of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseBranch {
    /// Repository name
    pub component: String,
    /// `release/<name>/<component>`
    pub branch: String,
}

/// A created release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePlan {
    /// Release name
    pub name: String,
    /// Release work item
    pub work_item_id: u64,
    /// Planned branches
    pub branches: Vec<ReleaseBranch>,
    /// Release notes
    pub notes: String,
}

/// How a release attempt ended
#[derive(Debug)]
pub enum ReleaseOutcome {
    /// Gate failed; nothing was created
    Blocked {
        /// Components without a succeeded build
        blocking: Vec<String>,
    },
    /// Release work item created
    Created(ReleasePlan),
    /// Gate passed but creating the release failed
    Failed(Error),
}

/// Result of `ReleaseFlow::create_release`
#[derive(Debug)]
pub struct ReleaseAttempt {
    /// Gate verdict
    pub readiness: ReadinessReport,
    /// What happened after the gate
    pub outcome: ReleaseOutcome,
}

/// Release manager agent
pub struct ReleaseFlow {
    ctx: AgentContext,
    work_items: Arc<dyn WorkItemService>,
    builds: Arc<dyn BuildService>,
    registry: BuildRegistry,
    retry: RetryConfig,
}

impl ReleaseFlow {
    /// New release flow reading tracked builds from `registry`
    pub fn new(
        memory: Memory,
        llm: Arc<dyn LlmProvider>,
        work_items: Arc<dyn WorkItemService>,
        builds: Arc<dyn BuildService>,
        registry: BuildRegistry,
        retry: RetryConfig,
    ) -> Self {
        Self {
            ctx: AgentContext::new(RELEASE_MANAGER_AGENT_ID, SYSTEM_PROMPT, memory, llm),
            work_items,
            builds,
            registry,
            retry,
        }
    }

    /// Agent context
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Check the latest build of every component.
    ///
    /// A build tracked by the monitor wins over the build service's latest
    /// build on `source_branch`.
    pub async fn verify_readiness(
        &self,
        components: &[RepositoryBinding],
        source_branch: &str,
    ) -> ReadinessReport {
        self.ctx
            .observe(
                format!("Verifying release readiness for {} components", components.len()),
                metadata!("source_branch" => source_branch),
            )
            .await;

        let mut verdicts = Vec::with_capacity(components.len());
        for component in components {
            verdicts.push(self.component_readiness(component, source_branch).await);
        }
        let report = ReadinessReport {
            ready: verdicts.iter().all(|c| c.ready),
            components: verdicts,
        };

        let decision = if report.ready {
            "All components ready for release".to_string()
        } else {
            format!("Release not ready, blocked by: {}", report.blocking().join(", "))
        };
        self.ctx
            .decide(decision, metadata!("ready" => report.ready, "blocking" => report.blocking()))
            .await;
        report
    }

    async fn component_readiness(
        &self,
        component: &RepositoryBinding,
        source_branch: &str,
    ) -> ComponentReadiness {
        let mut verdict = ComponentReadiness {
            component: component.name.clone(),
            ready: false,
            build_id: None,
            state: None,
            issues: Vec::new(),
        };

        if let Some(summary) = self.registry.latest(&component.name).await {
            verdict.build_id = Some(summary.build_id);
            verdict.state = Some(summary.state.to_string());
            verdict.ready = summary.state == BuildState::Succeeded;
            if !verdict.ready {
                let class = summary
                    .failure_class
                    .map(|c| format!(" ({c})"))
                    .unwrap_or_default();
                verdict
                    .issues
                    .push(format!("Build {} {}{class}", summary.build_id, summary.state));
            }
            return verdict;
        }

        let Some(definition) = &component.build_definition else {
            verdict
                .issues
                .push("No tracked build and no build definition configured".to_string());
            return verdict;
        };

        match call_with_backoff(&self.retry, || self.builds.latest(definition, source_branch)).await
        {
            Ok(Some(build)) => {
                verdict.build_id = Some(build.id);
                verdict.state = Some(build.status.to_string());
                verdict.ready = build.status == BuildStatus::Succeeded;
                if !verdict.ready {
                    verdict
                        .issues
                        .push(format!("Build not passing: {}", build.status));
                }
            }
            Ok(None) => verdict
                .issues
                .push(format!("No build of {definition} on {source_branch}")),
            Err(e) => {
                warn!(component = %component.name, error = %e, "Build status unavailable");
                verdict.issues.push(e.user_message());
            }
        }
        verdict
    }

    /// Release notes for `components`, from the reasoning service when it
    /// answers and from a fixed template otherwise
    pub async fn generate_release_notes(&self, components: &[String], source_branch: &str) -> String {
        self.ctx
            .observe(
                format!("Generating release notes for {} components", components.len()),
                metadata!(),
            )
            .await;
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let prompt = format!(
            "Generate release notes in markdown.\n\n\
             Release date: {date}\nComponents: {components}\nSource branch: {source_branch}\n\n\
             Use the sections New Features, Bug Fixes, Improvements, Breaking Changes, \
             Known Issues and Deployment Notes. Write \"None\" for an empty section. \
             Keep every bullet to one or two sentences.",
            components = components.join(", "),
        );
        match self.ctx.think(&prompt).await {
            Ok(notes) if !notes.trim().is_empty() => notes,
            Ok(_) => fallback_notes(&date, components, source_branch),
            Err(e) => {
                warn!(error = %e, "Falling back to template release notes");
                fallback_notes(&date, components, source_branch)
            }
        }
    }

    /// Gate, then create the release work item and plan release branches.
    ///
    /// Nothing is created when any component is blocked.
    pub async fn create_release(
        &self,
        components: &[RepositoryBinding],
        source_branch: &str,
        release_name: Option<&str>,
    ) -> ReleaseAttempt {
        let name = release_name
            .map(str::to_string)
            .unwrap_or_else(|| default_release_name(Utc::now()));
        self.ctx
            .observe(format!("Creating release: {name}"), metadata!("release" => &name))
            .await;

        let readiness = self.verify_readiness(components, source_branch).await;
        if !readiness.ready {
            let blocking = readiness.blocking();
            self.ctx
                .record_result(
                    format!("Release {name} blocked by {}", blocking.join(", ")),
                    false,
                    metadata!("release" => &name, "blocking" => &blocking),
                )
                .await;
            return ReleaseAttempt {
                readiness,
                outcome: ReleaseOutcome::Blocked { blocking },
            };
        }

        let names: Vec<String> = components.iter().map(|c| c.name.clone()).collect();
        let outcome = match self.publish(&name, &names, source_branch).await {
            Ok(plan) => {
                info!(release = %plan.name, work_item_id = plan.work_item_id, "Release created");
                self.ctx
                    .record_result(
                        format!("Created release {} with {} components", plan.name, names.len()),
                        true,
                        metadata!("release" => &plan.name, "work_item_id" => plan.work_item_id),
                    )
                    .await;
                ReleaseOutcome::Created(plan)
            }
            Err(e) => {
                self.ctx
                    .record_result(
                        format!("Release {name} failed: {}", e.user_message()),
                        false,
                        metadata!("release" => &name, "failure_class" => e.failure_label()),
                    )
                    .await;
                ReleaseOutcome::Failed(e)
            }
        };
        ReleaseAttempt { readiness, outcome }
    }

    async fn publish(&self, name: &str, components: &[String], source_branch: &str) -> Result<ReleasePlan> {
        let notes = self.generate_release_notes(components, source_branch).await;
        let mut fields = Fields::new();
        fields.insert("Microsoft.VSTS.Common.Priority".into(), json!(1));
        fields.insert("System.Tags".into(), json!("automated-release"));
        let work_item_id = call_with_backoff(&self.retry, || {
            self.work_items.create("Release", name, &notes, &fields)
        })
        .await?;

        let branches = components
            .iter()
            .map(|component| ReleaseBranch {
                component: component.clone(),
                branch: format!("release/{name}/{component}"),
            })
            .collect();
        Ok(ReleasePlan {
            name: name.to_string(),
            work_item_id,
            branches,
            notes,
        })
    }
}

fn default_release_name(now: chrono::DateTime<Utc>) -> String {
    now.format("Release-%Y.%m.%d").to_string()
}

fn fallback_notes(date: &str, components: &[String], source_branch: &str) -> String {
    let mut notes = format!(
        "# Release Notes\n\n**Release Date**: {date}\n**Components**: {}\n**Source Branch**: {source_branch}\n",
        components.join(", ")
    );
    for section in [
        "New Features",
        "Bug Fixes",
        "Improvements",
        "Breaking Changes",
        "Known Issues",
    ] {
        notes.push_str(&format!("\n## {section}\n- None\n"));
    }
    notes.push_str("\n## Deployment Notes\n- Standard deployment process\n");
    notes
}
