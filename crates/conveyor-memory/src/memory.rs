//! Fail-open facade used by agents.
//!
//! Memory is an audit and context aid, never a dependency of correctness:
//! a slow or unreachable store must not stall or fail an agent. Writes run
//! under a timeout and are dropped with a warning; reads return empty
//! results on error.

use crate::error::{Error, Result};
use crate::store::{InMemoryStore, MemoryStore, PurgeReport, RecentQuery, SqliteMemoryStore};
use crate::types::{ActionRecord, ActionStats, MemoryEntry, WorkItemSnapshot};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: u64 = 90;

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the memory store.
#[derive(Clone)]
pub struct Memory {
    store: Arc<dyn MemoryStore>,
    retention: Duration,
    write_timeout: Duration,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("backend", &self.store.backend())
            .field("retention", &self.retention)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl Memory {
    /// Wrap a store with the default retention (90 days) and write timeout.
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            retention: Duration::from_secs(DEFAULT_RETENTION_DAYS * SECS_PER_DAY),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Open a SQLite-backed memory at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = SqliteMemoryStore::from_path(path).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Process-local memory (tests, dry runs).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// Set the retention window in days.
    #[must_use]
    pub fn with_retention_days(mut self, days: u64) -> Self {
        self.retention = Duration::from_secs(days.saturating_mul(SECS_PER_DAY));
        self
    }

    /// Set the timeout applied to every write.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Retention window.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    async fn write<F>(&self, what: &'static str, agent_id: &str, fut: F)
    where
        F: std::future::Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(agent_id, backend = self.store.backend(), error = %e, "Dropped memory {what}");
            }
            Err(_) => {
                warn!(
                    agent_id,
                    backend = self.store.backend(),
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Memory {what} timed out"
                );
            }
        }
    }

    /// Append an entry. Never fails; problems are logged.
    pub async fn append(&self, entry: MemoryEntry) {
        self.write("append", &entry.agent_id, self.store.append(&entry))
            .await;
    }

    /// Log an action record. Never fails; problems are logged.
    pub async fn log_action(&self, record: ActionRecord) {
        self.write("action", &record.agent_id, self.store.log_action(&record))
            .await;
    }

    /// Record a work item snapshot. Never fails; problems are logged.
    pub async fn track_work_item(&self, snapshot: WorkItemSnapshot) {
        let agent = snapshot.assigned_agent.clone().unwrap_or_default();
        self.write("work item", &agent, self.store.track_work_item(&snapshot))
            .await;
    }

    /// Most recent entries matching `query`; empty on store errors.
    pub async fn recent(&self, query: &RecentQuery) -> Vec<MemoryEntry> {
        self.store.recent(query).await.unwrap_or_else(|e| {
            warn!(agent_id = %query.agent_id, error = %e, "Memory read failed");
            Vec::new()
        })
    }

    /// Content search; empty on store errors.
    pub async fn search(&self, query: &str, agent_id: Option<&str>, limit: usize) -> Vec<MemoryEntry> {
        self.store
            .search(query, agent_id, limit)
            .await
            .unwrap_or_else(|e| {
                warn!(query, error = %e, "Memory search failed");
                Vec::new()
            })
    }

    /// Action statistics; zeroed on store errors.
    pub async fn statistics(&self, agent_id: &str, action_type: Option<&str>) -> ActionStats {
        self.store
            .statistics(agent_id, action_type)
            .await
            .unwrap_or_else(|e| {
                warn!(agent_id, error = %e, "Memory statistics failed");
                ActionStats::default()
            })
    }

    /// Per-action-type statistics; empty on store errors.
    pub async fn statistics_by_action(&self, agent_id: &str) -> BTreeMap<String, ActionStats> {
        self.store
            .statistics_by_action(agent_id)
            .await
            .unwrap_or_else(|e| {
                warn!(agent_id, error = %e, "Memory statistics failed");
                BTreeMap::new()
            })
    }

    /// Latest snapshot of a work item; `None` on store errors.
    pub async fn work_item(&self, work_item_id: u64) -> Option<WorkItemSnapshot> {
        self.store
            .work_item(work_item_id)
            .await
            .unwrap_or_else(|e| {
                warn!(work_item_id, error = %e, "Work item lookup failed");
                None
            })
    }

    /// Remove everything older than the retention window.
    pub async fn purge_expired(&self) -> Result<PurgeReport> {
        self.purge_older_than(self.retention).await
    }

    /// Remove everything older than `age`.
    ///
    /// `age` may not be shorter than the retention window.
    pub async fn purge_older_than(&self, age: Duration) -> Result<PurgeReport> {
        if age < self.retention {
            return Err(Error::RetentionTooShort {
                requested_days: age.as_secs() / SECS_PER_DAY,
                minimum_days: self.retention.as_secs() / SECS_PER_DAY,
            });
        }
        let age = chrono::Duration::from_std(age).map_err(|e| Error::Internal(e.to_string()))?;
        let report = self.store.purge_before(Utc::now() - age).await?;
        if report.entries > 0 || report.actions > 0 {
            info!(
                entries = report.entries,
                actions = report.actions,
                "Purged expired memory"
            );
        }
        Ok(report)
    }

    /// Purge expired records every `every` until `cancel` fires.
    pub fn spawn_retention_sweeper(
        &self,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let memory = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = memory.purge_expired().await {
                            warn!(error = %e, "Retention purge failed");
                        }
                    }
                }
            }
        })
    }
}
