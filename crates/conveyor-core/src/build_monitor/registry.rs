use super::types::{BuildState, BuildSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Latest archived build chain per repository
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct BuildRegistry {
    latest: Arc<RwLock<HashMap<String, BuildSummary>>>,
}

impl BuildRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `summary` as the latest result for its repository
    pub async fn archive(&self, summary: BuildSummary) {
        self.latest
            .write()
            .await
            .insert(summary.repository.clone(), summary);
    }

    /// Latest archived result for `repository`
    pub async fn latest(&self, repository: &str) -> Option<BuildSummary> {
        self.latest.read().await.get(repository).cloned()
    }

    /// Whether the latest result for `repository` is green
    pub async fn is_green(&self, repository: &str) -> bool {
        self.latest(repository)
            .await
            .is_some_and(|s| s.state == BuildState::Succeeded)
    }

    /// Every archived result, by repository name
    pub async fn all(&self) -> Vec<BuildSummary> {
        let mut all: Vec<_> = self.latest.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.repository.cmp(&b.repository));
        all
    }
}
