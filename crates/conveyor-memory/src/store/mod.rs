//! Storage backends for memory entries, action records and work item snapshots.

use crate::error::Result;
use crate::types::{ActionRecord, ActionStats, MemoryEntry, MemoryKind, WorkItemSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteMemoryStore;

/// Filter for [`MemoryStore::recent`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecentQuery {
    /// Agent whose entries are returned
    pub agent_id: String,
    /// Only entries of this kind
    pub kind: Option<MemoryKind>,
    /// Only entries at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only entries tagged with this session
    pub session_id: Option<String>,
    /// Maximum number of entries
    pub limit: usize,
}

impl RecentQuery {
    /// Default number of entries returned.
    pub const DEFAULT_LIMIT: usize = 10;

    /// Query the most recent entries of an agent.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: None,
            since: None,
            session_id: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    /// Restrict to one kind.
    #[must_use]
    pub fn kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to entries at or after `since`.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Restrict to one session.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the maximum number of entries.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub(crate) fn matches(&self, entry: &MemoryEntry) -> bool {
        entry.agent_id == self.agent_id
            && self.kind.map_or(true, |kind| entry.kind == kind)
            && self.since.map_or(true, |since| entry.timestamp >= since)
            && self
                .session_id
                .as_deref()
                .map_or(true, |session| entry.session_id.as_deref() == Some(session))
    }
}

/// Rows removed by a retention purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Memory entries removed
    pub entries: u64,
    /// Action records removed
    pub actions: u64,
}

/// Persistence for agent memory.
///
/// Every write is a single atomic insert so concurrent appends from many
/// agents never interleave within an entry.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Backend name, for logs.
    fn backend(&self) -> &'static str;

    /// Append an entry.
    async fn append(&self, entry: &MemoryEntry) -> Result<()>;

    /// Entries matching `query`, newest first, at most `query.limit`.
    ///
    /// Entries sharing a timestamp are returned newest-inserted first.
    async fn recent(&self, query: &RecentQuery) -> Result<Vec<MemoryEntry>>;

    /// Entries whose content contains every whitespace-separated term of
    /// `query` (case-insensitive), newest first.
    async fn search(
        &self,
        query: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>>;

    /// Append an action record.
    async fn log_action(&self, record: &ActionRecord) -> Result<()>;

    /// Statistics over an agent's actions, optionally for one action type.
    async fn statistics(&self, agent_id: &str, action_type: Option<&str>) -> Result<ActionStats>;

    /// Statistics per action type.
    async fn statistics_by_action(&self, agent_id: &str) -> Result<BTreeMap<String, ActionStats>>;

    /// Append a work item snapshot.
    async fn track_work_item(&self, snapshot: &WorkItemSnapshot) -> Result<()>;

    /// Latest snapshot of a work item.
    async fn work_item(&self, work_item_id: u64) -> Result<Option<WorkItemSnapshot>>;

    /// Delete entries and actions strictly older than `cutoff`.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport>;
}

/// Lower-cased search terms; empty when the query has no terms.
pub(crate) fn search_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

/// Whether `content` contains every lower-cased term, compared with
/// Unicode case folding.
pub(crate) fn matches_terms(content: &str, terms: &[String]) -> bool {
    let content = content.to_lowercase();
    terms.iter().all(|t| content.contains(t.as_str()))
}
