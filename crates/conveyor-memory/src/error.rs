//! Error types for the memory store.

/// Errors that can occur in memory operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SQLite database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unknown memory kind label read from storage or user input
    #[error("unknown memory kind: {0}")]
    InvalidKind(String),

    /// A stored row could not be turned back into a record
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A purge was requested with a window shorter than the configured retention
    #[error("purge window of {requested_days} days is shorter than the {minimum_days} day retention")]
    RetentionTooShort {
        /// Requested age threshold in days
        requested_days: u64,
        /// Configured retention in days
        minimum_days: u64,
    },

    /// General internal error
    #[error("{0}")]
    Internal(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
