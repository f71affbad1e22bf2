use super::SqliteMemoryStore;
use crate::error::{Error, Result};
use crate::store::{matches_terms, search_terms, MemoryStore, PurgeReport, RecentQuery};
use crate::types::{ActionRecord, ActionStats, MemoryEntry, Metadata, WorkItemSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeMap;

const ENTRY_COLUMNS: &str =
    "SELECT agent_id, timestamp_us, kind, content, metadata, session_id FROM agent_memory";

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).ok_or_else(|| Error::Corrupt(format!("timestamp {us}")))
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl SqliteMemoryStore {
    fn row_to_entry(row: &SqliteRow) -> Result<MemoryEntry> {
        let kind: String = row.try_get("kind")?;
        let metadata: String = row.try_get("metadata")?;
        Ok(MemoryEntry {
            agent_id: row.try_get("agent_id")?,
            timestamp: from_micros(row.try_get("timestamp_us")?)?,
            kind: kind.parse()?,
            content: row.try_get("content")?,
            metadata: serde_json::from_str::<Metadata>(&metadata)?,
            session_id: row.try_get("session_id")?,
        })
    }

    fn row_to_snapshot(row: &SqliteRow) -> Result<WorkItemSnapshot> {
        let metadata: String = row.try_get("metadata")?;
        let id: i64 = row.try_get("work_item_id")?;
        Ok(WorkItemSnapshot {
            work_item_id: u64::try_from(id).map_err(|_| Error::Corrupt(format!("work item id {id}")))?,
            timestamp: from_micros(row.try_get("timestamp_us")?)?,
            item_type: row.try_get("item_type")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            state: row.try_get("state")?,
            assigned_agent: row.try_get("assigned_agent")?,
            metadata: serde_json::from_str::<Metadata>(&metadata)?,
        })
    }

    fn row_to_stats(row: &SqliteRow) -> Result<ActionStats> {
        let count: i64 = row.try_get("count")?;
        let successes: i64 = row.try_get("successes")?;
        let avg_ms: f64 = row.try_get("avg_ms")?;
        Ok(ActionStats::from_totals(
            count.max(0) as u64,
            successes.max(0) as u64,
            avg_ms,
        ))
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_memory (agent_id, timestamp_us, kind, content, metadata, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&entry.agent_id)
        .bind(to_micros(entry.timestamp))
        .bind(entry.kind.as_str())
        .bind(&entry.content)
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(&entry.session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, query: &RecentQuery) -> Result<Vec<MemoryEntry>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(ENTRY_COLUMNS);
        qb.push(" WHERE agent_id = ").push_bind(query.agent_id.clone());
        if let Some(kind) = query.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(since) = query.since {
            qb.push(" AND timestamp_us >= ").push_bind(to_micros(since));
        }
        if let Some(session) = &query.session_id {
            qb.push(" AND session_id = ").push_bind(session.clone());
        }
        qb.push(" ORDER BY timestamp_us DESC, id DESC LIMIT ")
            .push_bind(clamp_limit(query.limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_entry).collect()
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

        // SQLite's lower() folds ASCII only, so terms are matched here.
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(ENTRY_COLUMNS);
        if let Some(agent_id) = agent_id {
            qb.push(" WHERE agent_id = ").push_bind(agent_id.to_string());
        }
        qb.push(" ORDER BY timestamp_us DESC, id DESC");

        let query = qb.build();
        let mut rows = query.fetch(&self.pool);
        let mut hits = Vec::new();
        while hits.len() < limit {
            let Some(row) = rows.try_next().await? else {
                break;
            };
            let content: String = row.try_get("content")?;
            if matches_terms(&content, &terms) {
                hits.push(Self::row_to_entry(&row)?);
            }
        }
        Ok(hits)
    }

    async fn log_action(&self, record: &ActionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_actions
             (agent_id, timestamp_us, action_type, target, parameters, result, success, duration_ms, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&record.agent_id)
        .bind(to_micros(record.timestamp))
        .bind(&record.action_type)
        .bind(&record.target)
        .bind(serde_json::to_string(&record.parameters)?)
        .bind(serde_json::to_string(&record.result)?)
        .bind(record.success)
        .bind(i64::try_from(record.duration_ms).unwrap_or(i64::MAX))
        .bind(&record.session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn statistics(&self, agent_id: &str, action_type: Option<&str>) -> Result<ActionStats> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT COUNT(*) AS count,
                    COALESCE(SUM(success), 0) AS successes,
                    COALESCE(AVG(duration_ms), 0.0) AS avg_ms
             FROM agent_actions WHERE agent_id = ",
        );
        qb.push_bind(agent_id.to_string());
        if let Some(action_type) = action_type {
            qb.push(" AND action_type = ").push_bind(action_type.to_string());
        }
        let row = qb.build().fetch_one(&self.pool).await?;
        Self::row_to_stats(&row)
    }

    async fn statistics_by_action(&self, agent_id: &str) -> Result<BTreeMap<String, ActionStats>> {
        let rows = sqlx::query(
            "SELECT action_type,
                    COUNT(*) AS count,
                    COALESCE(SUM(success), 0) AS successes,
                    COALESCE(AVG(duration_ms), 0.0) AS avg_ms
             FROM agent_actions WHERE agent_id = ?1
             GROUP BY action_type ORDER BY action_type",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, ActionStats)> {
                Ok((row.try_get("action_type")?, Self::row_to_stats(row)?))
            })
            .collect()
    }

    async fn track_work_item(&self, snapshot: &WorkItemSnapshot) -> Result<()> {
        let id = i64::try_from(snapshot.work_item_id)
            .map_err(|_| Error::Internal(format!("work item id {} out of range", snapshot.work_item_id)))?;
        sqlx::query(
            "INSERT INTO work_items
             (work_item_id, timestamp_us, item_type, title, description, state, assigned_agent, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(id)
        .bind(to_micros(snapshot.timestamp))
        .bind(&snapshot.item_type)
        .bind(&snapshot.title)
        .bind(&snapshot.description)
        .bind(&snapshot.state)
        .bind(&snapshot.assigned_agent)
        .bind(serde_json::to_string(&snapshot.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn work_item(&self, work_item_id: u64) -> Result<Option<WorkItemSnapshot>> {
        let Ok(id) = i64::try_from(work_item_id) else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT work_item_id, timestamp_us, item_type, title, description, state,
                    assigned_agent, metadata
             FROM work_items WHERE work_item_id = ?1
             ORDER BY timestamp_us DESC, id DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_snapshot).transpose()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let cutoff = to_micros(cutoff);
        let entries = sqlx::query("DELETE FROM agent_memory WHERE timestamp_us < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let actions = sqlx::query("DELETE FROM agent_actions WHERE timestamp_us < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(PurgeReport { entries, actions })
    }
}
