//! Application configuration types

use anyhow::{Context, Result};
use conveyor_core::AgentSettings;
use conveyor_llm::util::mask_api_key;
use conveyor_llm::LlmSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the memory database and managed checkouts live
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub ado: AdoAppConfig,
    #[serde(default)]
    pub git: GitAppConfig,
    #[serde(default)]
    pub maven: MavenAppConfig,
    #[serde(default)]
    pub agents: AgentSettings,
    /// Repository bindings (YAML)
    #[serde(default = "default_repositories_file")]
    pub repositories_file: String,
}

fn default_repositories_file() -> String {
    "config/repositories.yaml".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            logging: LoggingConfig::default(),
            memory: MemoryConfig::default(),
            llm: LlmSettings::default(),
            ado: AdoAppConfig::default(),
            git: GitAppConfig::default(),
            maven: MavenAppConfig::default(),
            agents: AgentSettings::default(),
            repositories_file: default_repositories_file(),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Daily-rolling log file, in addition to stderr
    #[serde(default)]
    pub file: Option<String>,
    /// JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "conveyor=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
        }
    }
}

/// `[memory]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// SQLite database; `<data_dir>/memory.db` when unset
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_retention_days() -> u64 {
    conveyor_memory::DEFAULT_RETENTION_DAYS
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention_days: default_retention_days(),
        }
    }
}

/// `[ado]`
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdoAppConfig {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub project: String,
    /// Personal access token; usually `CONVEYOR_ADO__PAT`
    #[serde(default)]
    pub pat: Option<String>,
    /// Azure DevOps Server URL; dev.azure.com when unset
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for AdoAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdoAppConfig")
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("pat", &self.pat.as_deref().map(mask_api_key))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AdoAppConfig {
    /// Whether organization, project and token are all set
    pub fn is_configured(&self) -> bool {
        !self.organization.trim().is_empty()
            && !self.project.trim().is_empty()
            && self.pat.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

/// `[git]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitAppConfig {
    /// Managed checkouts; `<data_dir>/workspace` when unset
    #[serde(default)]
    pub workspace_dir: Option<String>,
    #[serde(default = "default_git_user_name")]
    pub user_name: String,
    #[serde(default = "default_git_user_email")]
    pub user_email: String,
    #[serde(default = "default_git_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_git_user_name() -> String {
    "Conveyor Agent".to_string()
}

fn default_git_user_email() -> String {
    "conveyor-agent@localhost".to_string()
}

fn default_git_timeout_secs() -> u64 {
    300
}

impl Default for GitAppConfig {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            user_name: default_git_user_name(),
            user_email: default_git_user_email(),
            timeout_secs: default_git_timeout_secs(),
        }
    }
}

/// `[maven]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MavenAppConfig {
    /// Run a local build before pushing
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub maven_home: Option<String>,
    #[serde(default = "default_maven_opts")]
    pub maven_opts: String,
    #[serde(default = "default_goals")]
    pub goals: Vec<String>,
    #[serde(default = "default_maven_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_maven_opts() -> String {
    "-Xmx2g".to_string()
}

fn default_goals() -> Vec<String> {
    vec!["clean".to_string(), "test".to_string()]
}

fn default_maven_timeout_secs() -> u64 {
    1800
}

impl Default for MavenAppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            maven_home: None,
            maven_opts: default_maven_opts(),
            goals: default_goals(),
            timeout_secs: default_maven_timeout_secs(),
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}

impl AppConfig {
    /// Data directory: configured, else the platform data dir, else `./data`
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) if !dir.trim().is_empty() => expand_home(dir),
            _ => dirs::data_local_dir()
                .map(|d| d.join("conveyor"))
                .unwrap_or_else(|| PathBuf::from("data")),
        }
    }

    /// SQLite database path
    pub fn memory_path(&self) -> PathBuf {
        match &self.memory.path {
            Some(path) => expand_home(path),
            None => self.data_dir().join("memory.db"),
        }
    }

    /// Managed checkout directory
    pub fn workspace_dir(&self) -> PathBuf {
        match &self.git.workspace_dir {
            Some(dir) => expand_home(dir),
            None => self.data_dir().join("workspace"),
        }
    }

    /// Repository bindings file
    pub fn repositories_path(&self) -> PathBuf {
        expand_home(&self.repositories_file)
    }

    /// Problems that stop task commands from working
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.ado.is_configured() {
            problems.push(
                "Azure DevOps is not configured: set ado.organization, ado.project and CONVEYOR_ADO__PAT"
                    .to_string(),
            );
        }
        if self.agents.max_parallel_repos == 0 {
            problems.push("agents.max_parallel_repos must be at least 1".to_string());
        }
        if self.agents.poll_interval_secs == 0 {
            problems.push("agents.poll_interval_secs must be at least 1".to_string());
        }
        if self.agents.build_timeout_secs < self.agents.poll_interval_secs {
            problems.push(
                "agents.build_timeout_secs is shorter than agents.poll_interval_secs".to_string(),
            );
        }
        if self.memory.retention_days == 0 {
            problems.push("memory.retention_days must be at least 1".to_string());
        }
        problems
    }

    /// TOML rendering with secrets masked
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.ado.pat = shown.ado.pat.as_deref().map(mask_api_key);
        shown.llm.openai.api_key = shown.llm.openai.api_key.as_deref().map(mask_api_key);
        toml::to_string_pretty(&shown).context("Failed to serialize config")
    }

    /// Write the configuration as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}
