//! Orchestrator core structure
//!
//! Wires the flows, the build monitor and the fix router together and
//! keeps track of executions.

use super::fix_router::FixRouter;
use super::types::TaskExecution;
use crate::agent::AgentContext;
use crate::build_monitor::BuildMonitor;
use crate::collaborators::{BuildService, BuildTool, GitService, WorkItemService};
use crate::config::AgentSettings;
use crate::flows::{CodeChangeFlow, FixPlan, ReleaseFlow, RequirementsFlow};
use crate::repository::RepositoryCatalog;
use conveyor_llm::LlmProvider;
use conveyor_memory::Memory;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Agent id the orchestrator writes memory under
pub const ORCHESTRATOR_AGENT_ID: &str = "orchestrator";

/// Finished executions kept for readers; the oldest are evicted first
pub const MAX_KEPT_EXECUTIONS: usize = 500;

const SYSTEM_PROMPT: &str = "You are the Orchestrator of an automated delivery system. \
You break tasks down, delegate them to the requirements, code, build and release agents \
and report the aggregate outcome.";

/// External services the orchestrator delegates to
#[derive(Clone)]
pub struct Collaborators {
    /// Work item tracking
    pub work_items: Arc<dyn WorkItemService>,
    /// CI builds
    pub builds: Arc<dyn BuildService>,
    /// Source control
    pub git: Arc<dyn GitService>,
    /// Reasoning service
    pub llm: Arc<dyn LlmProvider>,
    /// Local build before pushing, if configured
    pub build_tool: Option<Arc<dyn BuildTool>>,
}

/// Dispatches tasks and aggregates their sub-task outcomes
pub struct Orchestrator {
    pub(crate) ctx: AgentContext,
    pub(crate) catalog: RepositoryCatalog,
    pub(crate) settings: AgentSettings,
    pub(crate) requirements: RequirementsFlow,
    pub(crate) code_flows: HashMap<String, Arc<CodeChangeFlow>>,
    pub(crate) release: ReleaseFlow,
    pub(crate) monitor: Arc<BuildMonitor>,
    pub(crate) builds: Arc<dyn BuildService>,
    pub(crate) fix_router: Arc<FixRouter>,
    pub(crate) executions: Arc<DashMap<Uuid, TaskExecution>>,
    /// In-flight dispatches with their cancellation tokens
    pub(crate) active_executions: Arc<DashMap<Uuid, CancellationToken>>,
    pub(crate) shutdown: CancellationToken,
}

impl Orchestrator {
    /// Build the orchestrator and its agents.
    ///
    /// One code change flow is created per enabled repository binding.
    pub fn new(
        collaborators: Collaborators,
        memory: Memory,
        catalog: RepositoryCatalog,
        settings: AgentSettings,
    ) -> Self {
        let retry = settings.retry_config();
        let Collaborators {
            work_items,
            builds,
            git,
            llm,
            build_tool,
        } = collaborators;

        let monitor = Arc::new(BuildMonitor::with_llm(
            memory.clone(),
            llm.clone(),
            builds.clone(),
            settings.clone(),
        ));

        let code_flows: HashMap<String, Arc<CodeChangeFlow>> = catalog
            .enabled()
            .map(|repo| {
                let flow = CodeChangeFlow::new(
                    repo.clone(),
                    memory.clone(),
                    llm.clone(),
                    git.clone(),
                    builds.clone(),
                    build_tool.clone(),
                    monitor.clone(),
                    retry.clone(),
                );
                (repo.name.clone(), Arc::new(flow))
            })
            .collect();

        let fix_router = Arc::new(FixRouter::new(&code_flows));
        monitor.set_escalation_handler(fix_router.clone());

        let requirements =
            RequirementsFlow::new(memory.clone(), llm.clone(), work_items.clone(), retry.clone());
        let release = ReleaseFlow::new(
            memory.clone(),
            llm.clone(),
            work_items,
            builds.clone(),
            monitor.registry().clone(),
            retry,
        );

        info!(
            repositories = code_flows.len(),
            provider = llm.name(),
            "Orchestrator ready"
        );

        Self {
            ctx: AgentContext::new(ORCHESTRATOR_AGENT_ID, SYSTEM_PROMPT, memory, llm),
            catalog,
            settings,
            requirements,
            code_flows,
            release,
            monitor,
            builds,
            fix_router,
            executions: Arc::new(DashMap::new()),
            active_executions: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Agent context
    #[must_use]
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Repository catalog
    #[must_use]
    pub fn catalog(&self) -> &RepositoryCatalog {
        &self.catalog
    }

    /// Shared build monitor
    #[must_use]
    pub fn monitor(&self) -> &Arc<BuildMonitor> {
        &self.monitor
    }

    /// Code change flow of `repository`
    #[must_use]
    pub fn code_flow(&self, repository: &str) -> Option<&Arc<CodeChangeFlow>> {
        self.code_flows.get(repository)
    }

    /// Fix plans produced for escalated builds
    #[must_use]
    pub fn fix_plans(&self) -> Vec<FixPlan> {
        self.fix_router.plans()
    }

    /// Execution by id
    #[must_use]
    pub fn execution(&self, task_id: Uuid) -> Option<TaskExecution> {
        self.executions.get(&task_id).map(|e| e.value().clone())
    }

    /// Every execution, oldest first
    #[must_use]
    pub fn executions(&self) -> Vec<TaskExecution> {
        let mut all: Vec<TaskExecution> = self.executions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| e.started_at);
        all
    }

    /// Number of dispatches in flight
    #[must_use]
    pub fn active_execution_count(&self) -> usize {
        self.active_executions.len()
    }

    /// Token that fires on [`Orchestrator::shutdown`]
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel every in-flight dispatch. No new side effects are started;
    /// finished ones are not rolled back. Later dispatches run normally.
    pub fn cancel(&self) {
        info!(active = self.active_executions.len(), "Cancelling all executions");
        for entry in self.active_executions.iter() {
            entry.value().cancel();
        }
    }

    /// Cancel everything in flight and every later dispatch or build watch.
    pub fn shutdown(&self) {
        info!(active = self.active_executions.len(), "Orchestrator shutting down");
        self.shutdown.cancel();
    }

    /// Cancel one in-flight dispatch
    pub fn cancel_execution(&self, task_id: Uuid) -> bool {
        if let Some((_id, token)) = self.active_executions.remove(&task_id) {
            token.cancel();
            info!(task_id = %task_id, "Execution cancelled");
            true
        } else {
            false
        }
    }

    /// Whether [`Orchestrator::shutdown`] was called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Store a finished execution, evicting the oldest finished ones past
    /// [`MAX_KEPT_EXECUTIONS`].
    pub(crate) fn keep_finished(&self, execution: TaskExecution) {
        self.executions.insert(execution.task_id, execution);
        evict_finished(&self.executions, MAX_KEPT_EXECUTIONS);
    }
}

/// Drop the oldest finished executions until at most `cap` are finished.
/// Running executions are never evicted.
pub(crate) fn evict_finished(executions: &DashMap<Uuid, TaskExecution>, cap: usize) {
    let mut finished: Vec<_> = executions
        .iter()
        .filter_map(|e| e.value().finished_at.map(|at| (at, *e.key())))
        .collect();
    if finished.len() <= cap {
        return;
    }
    finished.sort();
    let excess = finished.len() - cap;
    for (_, task_id) in finished.into_iter().take(excess) {
        executions.remove(&task_id);
    }
}
