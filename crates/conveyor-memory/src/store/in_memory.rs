//! Process-local store used by tests and dry runs.

use super::{matches_terms, search_terms, MemoryStore, PurgeReport, RecentQuery};
use crate::error::Result;
use crate::types::{ActionRecord, ActionStats, MemoryEntry, WorkItemSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    entries: Vec<MemoryEntry>,
    actions: Vec<ActionRecord>,
    work_items: Vec<WorkItemSnapshot>,
}

/// Store that keeps everything in a vector behind a lock.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Newest first; among equal timestamps the later insertion wins.
fn newest_first<'a>(entries: impl DoubleEndedIterator<Item = &'a MemoryEntry>) -> Vec<MemoryEntry> {
    let mut out: Vec<MemoryEntry> = entries.rev().cloned().collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}

fn stats_of<'a>(records: impl Iterator<Item = &'a ActionRecord>) -> ActionStats {
    let (mut count, mut successes, mut total_ms) = (0u64, 0u64, 0f64);
    for record in records {
        count += 1;
        if record.success {
            successes += 1;
        }
        total_ms += record.duration_ms as f64;
    }
    let avg = if count == 0 { 0.0 } else { total_ms / count as f64 };
    ActionStats::from_totals(count, successes, avg)
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "in-memory"
    }

    async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        self.inner.write().await.entries.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, query: &RecentQuery) -> Result<Vec<MemoryEntry>> {
        let inner = self.inner.read().await;
        let mut out = newest_first(inner.entries.iter().filter(|e| query.matches(e)));
        out.truncate(query.limit);
        Ok(out)
    }

    async fn search(
        &self,
        query: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let terms = search_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        let mut out = newest_first(inner.entries.iter().filter(|e| {
            agent_id.map_or(true, |a| e.agent_id == a) && matches_terms(&e.content, &terms)
        }));
        out.truncate(limit);
        Ok(out)
    }

    async fn log_action(&self, record: &ActionRecord) -> Result<()> {
        self.inner.write().await.actions.push(record.clone());
        Ok(())
    }

    async fn statistics(&self, agent_id: &str, action_type: Option<&str>) -> Result<ActionStats> {
        let inner = self.inner.read().await;
        Ok(stats_of(inner.actions.iter().filter(|r| {
            r.agent_id == agent_id && action_type.map_or(true, |t| r.action_type == t)
        })))
    }

    async fn statistics_by_action(&self, agent_id: &str) -> Result<BTreeMap<String, ActionStats>> {
        let inner = self.inner.read().await;
        let mut types: Vec<&str> = inner
            .actions
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .map(|r| r.action_type.as_str())
            .collect();
        types.sort_unstable();
        types.dedup();
        Ok(types
            .into_iter()
            .map(|t| {
                let stats = stats_of(
                    inner
                        .actions
                        .iter()
                        .filter(|r| r.agent_id == agent_id && r.action_type == t),
                );
                (t.to_string(), stats)
            })
            .collect())
    }

    async fn track_work_item(&self, snapshot: &WorkItemSnapshot) -> Result<()> {
        self.inner.write().await.work_items.push(snapshot.clone());
        Ok(())
    }

    async fn work_item(&self, work_item_id: u64) -> Result<Option<WorkItemSnapshot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .work_items
            .iter()
            .filter(|s| s.work_item_id == work_item_id)
            .max_by_key(|s| s.timestamp)
            .cloned())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let mut inner = self.inner.write().await;
        let before = (inner.entries.len(), inner.actions.len());
        inner.entries.retain(|e| e.timestamp >= cutoff);
        inner.actions.retain(|r| r.timestamp >= cutoff);
        Ok(PurgeReport {
            entries: (before.0 - inner.entries.len()) as u64,
            actions: (before.1 - inner.actions.len()) as u64,
        })
    }
}
