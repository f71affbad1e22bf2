//! Repository bindings and component groups
//!
//! Bindings are loaded from a YAML file:
//!
//! ```yaml
//! repositories:
//!   - name: backend
//!     url: https://dev.azure.com/acme/shop/_git/backend
//!     build_definition: backend-ci
//! component_groups:
//!   core: [backend, api]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One repository an agent may change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryBinding {
    /// Unique name used in task parameters
    pub name: String,
    /// Clone URL
    pub url: String,
    /// Existing checkout to work in instead of the managed workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Azure DevOps repository id, needed for pull requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ado_repo_id: Option<String>,
    /// CI build definition; no definition means no build is tracked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_definition: Option<String>,
    /// Free text
    #[serde(default)]
    pub description: String,
    /// Disabled bindings are never dispatched to
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maven profiles passed with `-P`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maven_profiles: Vec<String>,
    /// Shell command that replaces the Maven invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_build_command: Option<String>,
    /// Extra environment for local builds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_vars: BTreeMap<String, String>,
    /// Branch pull requests target
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_enabled() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}

impl RepositoryBinding {
    /// Minimal enabled binding
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            local_path: None,
            ado_repo_id: None,
            build_definition: None,
            description: String::new(),
            enabled: true,
            maven_profiles: Vec::new(),
            custom_build_command: None,
            environment_vars: BTreeMap::new(),
            default_branch: default_branch(),
        }
    }

    /// Set the CI build definition
    #[must_use]
    pub fn with_build_definition(mut self, definition: impl Into<String>) -> Self {
        self.build_definition = Some(definition.into());
        self
    }
}

/// All configured repositories plus named groups of them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryCatalog {
    /// Repository bindings
    #[serde(default)]
    pub repositories: Vec<RepositoryBinding>,
    /// Group name to repository names
    #[serde(default)]
    pub component_groups: BTreeMap<String, Vec<String>>,
}

impl RepositoryCatalog {
    /// Catalog from bindings, without groups
    pub fn new(repositories: Vec<RepositoryBinding>) -> Self {
        Self {
            repositories,
            component_groups: BTreeMap::new(),
        }
    }

    /// Add a component group
    #[must_use]
    pub fn with_group(mut self, name: impl Into<String>, members: &[&str]) -> Self {
        self.component_groups
            .insert(name.into(), members.iter().map(|m| (*m).to_string()).collect());
        self
    }

    /// Parse catalog YAML; an empty document is an empty catalog.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Configuration(format!("invalid repository configuration: {e}")))
    }

    /// Load from a file. A missing file yields an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Repository configuration not found, no repositories bound");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let catalog = Self::from_yaml_str(&raw)?;
        info!(
            path = %path.display(),
            repositories = catalog.repositories.len(),
            "Loaded repository configuration"
        );
        Ok(catalog)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Binding by name
    pub fn get(&self, name: &str) -> Option<&RepositoryBinding> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Enabled bindings, in file order
    pub fn enabled(&self) -> impl Iterator<Item = &RepositoryBinding> {
        self.repositories.iter().filter(|r| r.enabled)
    }

    /// Names of every binding
    pub fn names(&self) -> Vec<&str> {
        self.repositories.iter().map(|r| r.name.as_str()).collect()
    }

    /// Problems with the catalog; empty when it is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut seen = HashSet::new();
        let mut duplicates: Vec<&str> = Vec::new();
        for repo in &self.repositories {
            if !seen.insert(repo.name.as_str()) && !duplicates.contains(&repo.name.as_str()) {
                duplicates.push(&repo.name);
            }
        }
        if !duplicates.is_empty() {
            problems.push(format!("duplicate repository names: {}", duplicates.join(", ")));
        }

        for repo in &self.repositories {
            if !["http://", "https://", "git@"]
                .iter()
                .any(|prefix| repo.url.starts_with(prefix))
            {
                problems.push(format!("invalid URL for repository {}: {}", repo.name, repo.url));
            }
            if let Some(path) = &repo.local_path {
                if !path.exists() {
                    problems.push(format!(
                        "local path for repository {} does not exist: {}",
                        repo.name,
                        path.display()
                    ));
                } else if !path.is_dir() {
                    problems.push(format!(
                        "local path for repository {} is not a directory: {}",
                        repo.name,
                        path.display()
                    ));
                } else if !path.join(".git").exists() {
                    warn!(repository = %repo.name, path = %path.display(), "Local path is not a git checkout");
                }
            }
        }

        for (group, members) in &self.component_groups {
            for member in members {
                if self.get(member).is_none() {
                    problems.push(format!(
                        "component group {group} references unknown repository {member}"
                    ));
                }
            }
        }

        problems
    }

    /// Expand group names, drop duplicates and check every name is an
    /// enabled binding. Order follows first mention.
    pub fn resolve(&self, field: &str, names: &[String]) -> Result<Vec<RepositoryBinding>> {
        let mut resolved: Vec<RepositoryBinding> = Vec::new();
        for name in names {
            let name = name.trim();
            let expanded: Vec<&str> = match self.component_groups.get(name) {
                Some(members) => members.iter().map(String::as_str).collect(),
                None => vec![name],
            };
            for member in expanded {
                let binding = self.get(member).ok_or_else(|| {
                    Error::validation(field, format!("unknown repository or component: {member}"))
                })?;
                if !binding.enabled {
                    return Err(Error::validation(
                        field,
                        format!("repository {member} is disabled"),
                    ));
                }
                if !resolved.iter().any(|r| r.name == binding.name) {
                    resolved.push(binding.clone());
                }
            }
        }
        Ok(resolved)
    }

    /// Commented starter file for `conveyor repos example`
    pub fn example_yaml() -> &'static str {
        r#"# Repositories Conveyor agents may change.
repositories:
  - name: backend
    url: https://dev.azure.com/acme/shop/_git/backend
    ado_repo_id: 00000000-0000-0000-0000-000000000001
    build_definition: backend-ci
    description: Order and payment services
    maven_profiles: [ci]
    environment_vars:
      JAVA_OPTS: -Xmx2g

  - name: frontend
    url: https://dev.azure.com/acme/shop/_git/frontend
    build_definition: frontend-ci
    custom_build_command: npm ci && npm test

  - name: api
    url: git@ssh.dev.azure.com:v3/acme/shop/api
    local_path: ~/src/api
    enabled: false

# Names usable wherever a component list is expected.
component_groups:
  core: [backend, api]
  web: [frontend]
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> RepositoryCatalog {
        let mut disabled = RepositoryBinding::new("legacy", "https://example.com/legacy.git");
        disabled.enabled = false;
        RepositoryCatalog::new(vec![
            RepositoryBinding::new("backend", "https://example.com/backend.git"),
            RepositoryBinding::new("frontend", "git@example.com:frontend.git"),
            RepositoryBinding::new("api", "https://example.com/api.git"),
            disabled,
        ])
        .with_group("core", &["backend", "api"])
    }

    #[test]
    fn test_example_yaml_parses() {
        let catalog = RepositoryCatalog::from_yaml_str(RepositoryCatalog::example_yaml()).unwrap();
        assert_eq!(catalog.names(), vec!["backend", "frontend", "api"]);
        assert_eq!(catalog.enabled().count(), 2);
        assert_eq!(catalog.get("backend").unwrap().default_branch, "main");
        assert_eq!(catalog.component_groups["core"], vec!["backend", "api"]);
    }

    #[test]
    fn test_empty_document_is_empty_catalog() {
        assert!(RepositoryCatalog::from_yaml_str("  \n").unwrap().repositories.is_empty());
        assert!(RepositoryCatalog::from_yaml_str("repositories: [").is_err());
    }

    #[test]
    fn test_missing_file_is_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RepositoryCatalog::load(dir.path().join("nope.yaml")).unwrap();
        assert!(catalog.repositories.is_empty());
    }

    #[test]
    fn test_resolve_expands_groups_and_dedupes() {
        let names = vec!["core".to_string(), "backend".to_string(), "frontend".to_string()];
        let resolved = catalog().resolve("components", &names).unwrap();
        let resolved: Vec<_> = resolved.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(resolved, vec!["backend", "api", "frontend"]);
    }

    #[test]
    fn test_resolve_rejects_unknown_and_disabled() {
        let err = catalog()
            .resolve("repositories", &["mobile".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "repositories"));
        assert!(catalog().resolve("repositories", &["legacy".to_string()]).is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let mut not_a_dir = RepositoryBinding::new("dup", "https://example.com/a.git");
        not_a_dir.local_path = Some(file);
        let mut missing = RepositoryBinding::new("other", "ftp://example.com/b");
        missing.local_path = Some(dir.path().join("missing"));
        let catalog = RepositoryCatalog::new(vec![
            not_a_dir,
            RepositoryBinding::new("dup", "https://example.com/c.git"),
            missing,
        ])
        .with_group("g", &["ghost"]);

        let problems = catalog.validate();
        assert_eq!(problems.len(), 5, "{problems:?}");
        assert!(problems[0].contains("duplicate repository names: dup"));
        assert!(problems.iter().any(|p| p.contains("invalid URL")));
        assert!(problems.iter().any(|p| p.contains("not a directory")));
        assert!(problems.iter().any(|p| p.contains("does not exist")));
        assert!(problems.iter().any(|p| p.contains("unknown repository ghost")));
    }

    #[test]
    fn test_valid_catalog_has_no_problems() {
        assert!(catalog().validate().is_empty());
    }
}
