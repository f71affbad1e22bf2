//! Core record types written by agents.

use crate::error::Error;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Opaque key/value metadata attached to entries.
///
/// Ordered so that the serialized form is stable.
pub type Metadata = BTreeMap<String, Value>;

/// Current time at the precision the stores persist (microseconds).
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// What an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Prompt/response exchange with the reasoning service
    Conversation,
    /// Something the agent noticed
    Observation,
    /// A choice the agent made, written before it takes effect
    Decision,
    /// An operation the agent performed
    Action,
    /// The outcome of an operation
    Result,
}

impl MemoryKind {
    /// All kinds, in declaration order.
    pub const ALL: [MemoryKind; 5] = [
        Self::Conversation,
        Self::Observation,
        Self::Decision,
        Self::Action,
        Self::Result,
    ];

    /// Storage label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Observation => "observation",
            Self::Decision => "decision",
            Self::Action => "action",
            Self::Result => "result",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidKind(s.to_string()))
    }
}

/// One immutable memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Agent that wrote the entry
    pub agent_id: String,
    /// When the entry was written
    pub timestamp: DateTime<Utc>,
    /// What the entry describes
    pub kind: MemoryKind,
    /// Free text
    pub content: String,
    /// Opaque structured detail
    #[serde(default)]
    pub metadata: Metadata,
    /// Session the entry belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl MemoryEntry {
    /// Create an entry stamped with the current time.
    pub fn new(agent_id: impl Into<String>, kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            timestamp: timestamp_now(),
            kind,
            content: content.into(),
            metadata: Metadata::new(),
            session_id: None,
        }
    }

    /// Attach a metadata value.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Tag the entry with a session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Override the timestamp (truncated to storage precision).
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(6);
        self
    }
}

/// A single operation performed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Agent that performed the action
    pub agent_id: String,
    /// When the action finished
    pub timestamp: DateTime<Utc>,
    /// Operation name, e.g. `retry_build`
    pub action_type: String,
    /// What the action was applied to
    pub target: String,
    /// Input parameters
    #[serde(default)]
    pub parameters: Value,
    /// Output, if any
    #[serde(default)]
    pub result: Value,
    /// Whether the action succeeded
    pub success: bool,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Session the action belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ActionRecord {
    /// Create a successful, zero-duration record stamped now.
    pub fn new(
        agent_id: impl Into<String>,
        action_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            timestamp: timestamp_now(),
            action_type: action_type.into(),
            target: target.into(),
            parameters: Value::Null,
            result: Value::Null,
            success: true,
            duration_ms: 0,
            session_id: None,
        }
    }

    /// Set the input parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the result payload.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    /// Set the success flag.
    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Set the duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Tag the record with a session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Override the timestamp (truncated to storage precision).
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(6);
        self
    }

    /// Duration as a [`Duration`].
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Aggregated action statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStats {
    /// Number of recorded actions
    pub count: u64,
    /// Actions with `success = true`
    pub successes: u64,
    /// Actions with `success = false`
    pub failures: u64,
    /// `successes / count`, 0.0 when empty
    pub success_rate: f64,
    /// Mean duration in milliseconds, 0.0 when empty
    pub avg_duration_ms: f64,
}

impl ActionStats {
    pub(crate) fn from_totals(count: u64, successes: u64, avg_duration_ms: f64) -> Self {
        let success_rate = if count == 0 {
            0.0
        } else {
            successes as f64 / count as f64
        };
        Self {
            count,
            successes,
            failures: count.saturating_sub(successes),
            success_rate,
            avg_duration_ms,
        }
    }

    /// Mean duration as a [`Duration`].
    pub fn avg_duration(&self) -> Duration {
        Duration::from_secs_f64(self.avg_duration_ms.max(0.0) / 1000.0)
    }
}

/// A point-in-time view of a work item as an agent understood it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemSnapshot {
    /// Work item id in the tracking system
    pub work_item_id: u64,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Work item type (User Story, Feature, Release, ...)
    pub item_type: String,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Workflow state as seen by the agent
    pub state: String,
    /// Agent handling the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    /// Analysis results and other structured detail
    #[serde(default)]
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_is_case_insensitive() {
        assert_eq!("Decision".parse::<MemoryKind>().unwrap(), MemoryKind::Decision);
        assert_eq!(" result ".parse::<MemoryKind>().unwrap(), MemoryKind::Result);
        assert!("thought".parse::<MemoryKind>().is_err());
    }

    #[test]
    fn test_timestamps_are_microsecond_precision() {
        let entry = MemoryEntry::new("a", MemoryKind::Observation, "x");
        assert_eq!(entry.timestamp.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_stats_from_totals() {
        let stats = ActionStats::from_totals(4, 3, 250.0);
        assert_eq!(stats.failures, 1);
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.avg_duration(), Duration::from_millis(250));

        let empty = ActionStats::from_totals(0, 0, 0.0);
        assert_eq!(empty.success_rate, 0.0);
    }
}
