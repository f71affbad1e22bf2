//! Agent tuning knobs (`[agents]` configuration section)

use crate::utils::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by the orchestrator, flows and build monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Automatic retries allowed for intermittent build failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on polling a single build
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    /// Delay between build status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-repository executions running at once for one task
    #[serde(default = "default_max_parallel_repos")]
    pub max_parallel_repos: usize,
    /// Timeout applied to every memory write
    #[serde(default = "default_memory_write_timeout_ms")]
    pub memory_write_timeout_ms: u64,
    /// Backoff for transient collaborator failures
    #[serde(default)]
    pub collaborator_retry: RetrySettings,
    /// Characters of build log handed to the classifier
    #[serde(default = "default_log_excerpt_chars")]
    pub log_excerpt_chars: usize,
}

/// Call-site retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    /// First backoff delay
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff ceiling
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_build_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_max_parallel_repos() -> usize {
    4
}

fn default_memory_write_timeout_ms() -> u64 {
    5_000
}

fn default_log_excerpt_chars() -> usize {
    4_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            build_timeout_secs: default_build_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_parallel_repos: default_max_parallel_repos(),
            memory_write_timeout_ms: default_memory_write_timeout_ms(),
            collaborator_retry: RetrySettings::default(),
            log_excerpt_chars: default_log_excerpt_chars(),
        }
    }
}

impl AgentSettings {
    /// Build polling upper bound
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Delay between polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Memory write timeout
    pub fn memory_write_timeout(&self) -> Duration {
        Duration::from_millis(self.memory_write_timeout_ms)
    }

    /// Retry policy for collaborator calls
    pub fn retry_config(&self) -> RetryConfig {
        self.collaborator_retry.to_retry_config()
    }
}

impl RetrySettings {
    /// Convert to a [`RetryConfig`]
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_attempts.max(1))
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}
