//! Conveyor Memory: the append-only record every agent reads and writes.
//!
//! Agents describe what they observed, decided, did and achieved as
//! [`MemoryEntry`] values, and log each concrete operation as an
//! [`ActionRecord`]. Entries are never updated or deleted individually;
//! they only age out once they are older than the retention window.
//!
//! # Architecture
//!
//! ```text
//! agents ──► Memory (fail-open facade, write timeout, retention)
//!                 │
//!          dyn MemoryStore
//!           ╱            ╲
//!   SqliteMemoryStore   InMemoryStore
//!   (agent_memory,      (tests, dry runs)
//!    agent_actions,
//!    work_items)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use memory::{Memory, DEFAULT_RETENTION_DAYS};
pub use store::{InMemoryStore, MemoryStore, PurgeReport, RecentQuery, SqliteMemoryStore};
pub use types::{
    ActionRecord, ActionStats, MemoryEntry, MemoryKind, Metadata, WorkItemSnapshot,
};
