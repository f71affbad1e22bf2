//! In-crate fakes shared by unit tests

use crate::build_monitor::{BuildMonitor, EscalationHandler, EscalationRequest};
use crate::collaborators::{BuildInfo, BuildService, BuildStatus};
use crate::config::AgentSettings;
use crate::error::{Error, Result};
use crate::utils::RetryConfig;
use async_trait::async_trait;
use conveyor_llm::mock::ScriptedProvider;
use conveyor_memory::Memory;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    builds: HashMap<u64, BuildInfo>,
    scripts: HashMap<String, VecDeque<BuildStatus>>,
    queued: Vec<(String, String)>,
    next_id: u64,
    queue_unavailable: bool,
    get_unavailable: bool,
}

/// Build service whose builds finish immediately with scripted statuses.
///
/// Builds queued for a definition take the next status from that
/// definition's script; once it is exhausted they succeed.
pub(crate) struct FakeBuildService {
    state: Mutex<State>,
    logs: String,
}

impl FakeBuildService {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 100,
                ..Default::default()
            }),
            logs: "[ERROR] BUILD FAILURE".to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an existing build
    pub(crate) fn with_build(self, id: u64, definition: &str, branch: &str, status: BuildStatus) -> Self {
        self.lock().builds.insert(
            id,
            BuildInfo {
                id,
                status,
                definition: definition.to_string(),
                branch: branch.to_string(),
                logs_ref: Some(format!("https://ci.example.com/builds/{id}/logs")),
                finished_at: None,
            },
        );
        self
    }

    /// Statuses for builds queued on `definition`
    pub(crate) fn with_script(self, definition: &str, statuses: &[BuildStatus]) -> Self {
        self.lock()
            .scripts
            .insert(definition.to_string(), statuses.iter().copied().collect());
        self
    }

    pub(crate) fn queue_unavailable(self) -> Self {
        self.lock().queue_unavailable = true;
        self
    }

    pub(crate) fn get_unavailable(self) -> Self {
        self.lock().get_unavailable = true;
        self
    }

    pub(crate) fn remove(&self, id: u64) {
        self.lock().builds.remove(&id);
    }

    pub(crate) fn queued(&self) -> Vec<(String, String)> {
        self.lock().queued.clone()
    }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn get(&self, build_id: u64) -> Result<Option<BuildInfo>> {
        let state = self.lock();
        if state.get_unavailable {
            return Err(Error::unavailable("builds", "503 Service Unavailable"));
        }
        Ok(state.builds.get(&build_id).cloned())
    }

    async fn logs(&self, _build_id: u64) -> Result<String> {
        Ok(self.logs.clone())
    }

    async fn queue(&self, definition: &str, branch: &str) -> Result<u64> {
        let mut state = self.lock();
        if state.queue_unavailable {
            return Err(Error::unavailable("builds", "queue rejected"));
        }
        state.next_id += 1;
        let id = state.next_id;
        let status = state
            .scripts
            .get_mut(definition)
            .and_then(VecDeque::pop_front)
            .unwrap_or(BuildStatus::Succeeded);
        state.queued.push((definition.to_string(), branch.to_string()));
        state.builds.insert(
            id,
            BuildInfo {
                id,
                status,
                definition: definition.to_string(),
                branch: branch.to_string(),
                logs_ref: Some(format!("https://ci.example.com/builds/{id}/logs")),
                finished_at: None,
            },
        );
        Ok(id)
    }

    async fn latest(&self, definition: &str, branch: &str) -> Result<Option<BuildInfo>> {
        let state = self.lock();
        Ok(state
            .builds
            .values()
            .filter(|b| b.definition == definition && b.branch == branch)
            .max_by_key(|b| b.id)
            .cloned())
    }
}

/// Escalation handler that records what it receives
#[derive(Default)]
pub(crate) struct RecordingEscalations {
    pub(crate) received: Mutex<Vec<EscalationRequest>>,
}

impl RecordingEscalations {
    pub(crate) fn received(&self) -> Vec<EscalationRequest> {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EscalationHandler for RecordingEscalations {
    async fn handle(&self, request: &EscalationRequest) -> Result<()> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(())
    }
}

/// Settings with millisecond timings
pub(crate) fn fast_settings() -> AgentSettings {
    AgentSettings {
        poll_interval_secs: 0,
        build_timeout_secs: 5,
        ..Default::default()
    }
}

/// Classifier answer naming `label`
pub(crate) fn classification(label: &str) -> String {
    format!(r#"{{"failure_type": "{label}", "root_cause": "scripted", "fix_suggestions": []}}"#)
}

/// Monitor over `builds` classifying with `llm`, without backoff delays
pub(crate) fn monitor(
    memory: Memory,
    llm: Arc<ScriptedProvider>,
    builds: Arc<dyn BuildService>,
    settings: AgentSettings,
) -> BuildMonitor {
    BuildMonitor::with_llm(memory, llm, builds, settings).with_retry_config(RetryConfig::immediate(2))
}
