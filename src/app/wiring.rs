//! Builds the orchestrator and its collaborators from configuration

use super::config::{expand_home, AppConfig};
use anyhow::{bail, Context, Result};
use conveyor_core::{BuildTool, Collaborators, Orchestrator, RepositoryCatalog};
use conveyor_integrations::{
    AdoClient, AdoConfig, GitCli, GitConfig, MavenBuildTool, MavenConfig,
};
use conveyor_memory::Memory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Open the memory store named by the configuration
pub async fn open_memory(config: &AppConfig) -> Result<Memory> {
    let path = config.memory_path();
    let memory = Memory::open(&path)
        .await
        .with_context(|| format!("Failed to open memory database {}", path.display()))?;
    Ok(memory
        .with_retention_days(config.memory.retention_days)
        .with_write_timeout(config.agents.memory_write_timeout()))
}

/// Load repository bindings, expanding `~` in local paths
pub fn load_catalog(config: &AppConfig) -> Result<RepositoryCatalog> {
    let path = config.repositories_path();
    let mut catalog = RepositoryCatalog::load(&path)
        .with_context(|| format!("Failed to load repositories from {}", path.display()))?;
    for repo in &mut catalog.repositories {
        if let Some(local) = &repo.local_path {
            let expanded: PathBuf = expand_home(&local.to_string_lossy());
            repo.local_path = Some(expanded);
        }
    }
    Ok(catalog)
}

/// Azure DevOps client; fails when the `[ado]` section is incomplete
pub fn ado_client(config: &AppConfig) -> Result<Arc<AdoClient>> {
    let ado = &config.ado;
    if !ado.is_configured() {
        bail!(conveyor_core::Error::Configuration(
            "Azure DevOps is not configured (ado.organization, ado.project, CONVEYOR_ADO__PAT)"
                .to_string()
        ));
    }
    let mut settings = AdoConfig::new(
        &ado.organization,
        &ado.project,
        ado.pat.clone().unwrap_or_default(),
    );
    if let Some(url) = &ado.base_url {
        settings = settings.with_base_url(url);
    }
    if let Some(secs) = ado.timeout_secs {
        settings = settings.with_timeout(Duration::from_secs(secs.max(1)));
    }
    Ok(Arc::new(AdoClient::new(settings)?))
}

fn build_tool(config: &AppConfig) -> Option<Arc<dyn BuildTool>> {
    if !config.maven.enabled {
        return None;
    }
    let maven = &config.maven;
    Some(Arc::new(MavenBuildTool::new(MavenConfig {
        maven_home: maven.maven_home.as_deref().map(expand_home),
        maven_opts: maven.maven_opts.clone(),
        goals: maven.goals.clone(),
        timeout: Duration::from_secs(maven.timeout_secs.max(1)),
        ..MavenConfig::default()
    })))
}

/// Fully wired application
pub struct App {
    pub config: AppConfig,
    pub memory: Memory,
    pub orchestrator: Orchestrator,
}

impl App {
    /// Wire every collaborator; fails fast on missing settings.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let memory = open_memory(&config).await?;
        let catalog = load_catalog(&config)?;
        let problems = catalog.validate();
        if !problems.is_empty() {
            bail!(
                "Repository configuration has problems:\n  - {}",
                problems.join("\n  - ")
            );
        }

        let ado = ado_client(&config)?;
        let llm = conveyor_llm::build_provider(&config.llm)
            .context("Failed to set up the reasoning provider")?;

        let mut git_config = GitConfig::new(config.workspace_dir());
        git_config.user_name = config.git.user_name.clone();
        git_config.user_email = config.git.user_email.clone();
        git_config.timeout = Duration::from_secs(config.git.timeout_secs.max(1));
        let git = GitCli::new(git_config).with_pull_requests(ado.clone());

        let collaborators = Collaborators {
            work_items: ado.clone(),
            builds: ado,
            git: Arc::new(git),
            llm,
            build_tool: build_tool(&config),
        };

        info!(
            repositories = catalog.repositories.len(),
            memory = %config.memory_path().display(),
            "Application wired"
        );
        let orchestrator =
            Orchestrator::new(collaborators, memory.clone(), catalog, config.agents.clone());
        Ok(Self {
            config,
            memory,
            orchestrator,
        })
    }
}
