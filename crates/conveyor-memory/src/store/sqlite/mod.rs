//! SQLite persistence for agent memory.
//!
//! Tables (`agent_memory`, `agent_actions`, `work_items`) are plain
//! append-only logs keyed by agent and microsecond timestamp, so external
//! audit tooling can read them directly.
//!
//! ```no_run
//! use conveyor_memory::SqliteMemoryStore;
//!
//! # async fn example() -> conveyor_memory::Result<()> {
//! let store = SqliteMemoryStore::from_path("/var/lib/conveyor/memory.db").await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

mod crud;
mod migrations;


/// SQLite-backed memory store.
#[derive(Clone)]
pub struct SqliteMemoryStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// Open (or create) a store at the given path.
    pub async fn from_path(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Internal(format!("mkdir: {e}")))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(path = %db_path.display(), "Memory store initialized");
        Ok(store)
    }

    /// In-memory store (for tests).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        debug!("In-memory memory store initialized");
        Ok(store)
    }

    /// Default database location (`~/.conveyor/memory.db`).
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".conveyor").join("memory.db"))
            .ok_or_else(|| Error::Internal("could not determine home directory".to_string()))
    }
}
