use super::SqliteMemoryStore;
use crate::error::Result;

impl SqliteMemoryStore {
    pub(crate) async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_memory (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id     TEXT NOT NULL,
                timestamp_us INTEGER NOT NULL,
                kind         TEXT NOT NULL,
                content      TEXT NOT NULL,
                metadata     TEXT NOT NULL DEFAULT '{}',
                session_id   TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_memory_agent
             ON agent_memory(agent_id, timestamp_us)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_memory_kind
             ON agent_memory(kind, timestamp_us)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_actions (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id     TEXT NOT NULL,
                timestamp_us INTEGER NOT NULL,
                action_type  TEXT NOT NULL,
                target       TEXT NOT NULL,
                parameters   TEXT NOT NULL DEFAULT 'null',
                result       TEXT NOT NULL DEFAULT 'null',
                success      INTEGER NOT NULL,
                duration_ms  INTEGER NOT NULL DEFAULT 0,
                session_id   TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_actions_agent
             ON agent_actions(agent_id, action_type, timestamp_us)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS work_items (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                work_item_id   INTEGER NOT NULL,
                timestamp_us   INTEGER NOT NULL,
                item_type      TEXT NOT NULL,
                title          TEXT NOT NULL,
                description    TEXT NOT NULL DEFAULT '',
                state          TEXT NOT NULL,
                assigned_agent TEXT,
                metadata       TEXT NOT NULL DEFAULT '{}'
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_work_items_id
             ON work_items(work_item_id, timestamp_us)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
