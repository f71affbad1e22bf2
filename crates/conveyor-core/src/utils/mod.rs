//! Utility modules for conveyor-core
//!
//! - retry: bounded exponential backoff for collaborator calls
//! - text: slugs and excerpts

mod retry;
pub mod text;

pub use retry::{call_with_backoff, retry_with_backoff, RetryConfig, RetryError};
