//! Local build tool running Maven, or a repository's custom build command

use crate::process::{self, ProcessError};
use async_trait::async_trait;
use conveyor_core::utils::text::tail;
use conveyor_core::{BuildTool, Error, LocalBuildResult, RepositoryBinding, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Settings for [`MavenBuildTool`]
#[derive(Debug, Clone)]
pub struct MavenConfig {
    /// Maven installation; `mvn` from `PATH` when unset
    pub maven_home: Option<PathBuf>,
    /// `MAVEN_OPTS` for every run
    pub maven_opts: String,
    /// Goals to run
    pub goals: Vec<String>,
    /// Deadline for one build
    pub timeout: Duration,
    /// Characters of output kept in the result
    pub output_tail_chars: usize,
}

impl Default for MavenConfig {
    fn default() -> Self {
        Self {
            maven_home: None,
            maven_opts: "-Xmx2g".to_string(),
            goals: vec!["clean".to_string(), "test".to_string()],
            timeout: Duration::from_secs(1800),
            output_tail_chars: 4_000,
        }
    }
}

/// [`BuildTool`] that runs `mvn -B <goals>` in the checkout
pub struct MavenBuildTool {
    config: MavenConfig,
}

impl MavenBuildTool {
    /// Create the tool
    pub fn new(config: MavenConfig) -> Self {
        Self { config }
    }

    /// Program and arguments for `repo`
    pub fn command(&self, repo: &RepositoryBinding) -> (String, Vec<String>) {
        if let Some(custom) = repo.custom_build_command.as_deref().filter(|c| !c.trim().is_empty())
        {
            let (program, args) = process::shell(custom);
            return (program.to_string(), args);
        }

        let program = match &self.config.maven_home {
            Some(home) => home.join("bin").join("mvn").to_string_lossy().into_owned(),
            None => "mvn".to_string(),
        };
        let mut args = vec!["-B".to_string()];
        if !repo.maven_profiles.is_empty() {
            args.push("-P".to_string());
            args.push(repo.maven_profiles.join(","));
        }
        args.extend(self.config.goals.iter().cloned());
        (program, args)
    }

    fn environment(&self, repo: &RepositoryBinding) -> BTreeMap<String, String> {
        let mut envs = BTreeMap::new();
        if !self.config.maven_opts.is_empty() {
            envs.insert("MAVEN_OPTS".to_string(), self.config.maven_opts.clone());
        }
        if let Some(home) = &self.config.maven_home {
            envs.insert("MAVEN_HOME".to_string(), home.to_string_lossy().into_owned());
        }
        // repository settings win
        envs.extend(repo.environment_vars.clone());
        envs
    }
}

#[async_trait]
impl BuildTool for MavenBuildTool {
    #[instrument(skip(self, repo), fields(repo = %repo.name))]
    async fn run(&self, repo: &RepositoryBinding, workdir: &Path) -> Result<LocalBuildResult> {
        let (program, args) = self.command(repo);
        let envs = self.environment(repo);
        info!(program = %program, args = ?args, "Running local build");

        match process::run(&program, &args, Some(workdir), &envs, self.config.timeout).await {
            Ok(output) => {
                let result = LocalBuildResult {
                    success: output.success,
                    exit_code: output.exit_code,
                    output_tail: tail(&output.combined(), self.config.output_tail_chars)
                        .to_string(),
                    duration_ms: u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX),
                };
                if result.success {
                    info!(duration_ms = result.duration_ms, "Local build passed");
                } else {
                    warn!(exit_code = ?result.exit_code, "Local build failed");
                }
                Ok(result)
            }
            Err(ProcessError::Timeout { timeout, .. }) => {
                warn!(timeout_secs = timeout.as_secs(), "Local build timed out");
                Ok(LocalBuildResult {
                    success: false,
                    exit_code: None,
                    output_tail: format!("build timed out after {}s", timeout.as_secs()),
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Err(e @ ProcessError::Spawn { .. }) => Err(Error::Configuration(e.to_string())),
            Err(e @ ProcessError::Wait { .. }) => Err(Error::Internal(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryBinding {
        RepositoryBinding::new("backend", "https://example.com/backend.git")
    }

    #[test]
    fn test_maven_command_with_profiles() {
        let tool = MavenBuildTool::new(MavenConfig {
            maven_home: Some(PathBuf::from("/opt/maven")),
            ..MavenConfig::default()
        });
        let mut repo = repo();
        repo.maven_profiles = vec!["ci".into(), "integration".into()];

        let (program, args) = tool.command(&repo);
        assert_eq!(program, "/opt/maven/bin/mvn");
        assert_eq!(args, vec!["-B", "-P", "ci,integration", "clean", "test"]);
    }

    #[test]
    fn test_custom_command_replaces_maven() {
        let tool = MavenBuildTool::new(MavenConfig::default());
        let mut repo = repo();
        repo.custom_build_command = Some("./gradlew check".into());

        let (program, args) = tool.command(&repo);
        assert_ne!(program, "mvn");
        assert_eq!(args.last().map(String::as_str), Some("./gradlew check"));
    }

    #[test]
    fn test_repository_environment_overrides_defaults() {
        let tool = MavenBuildTool::new(MavenConfig::default());
        let mut repo = repo();
        repo.environment_vars
            .insert("MAVEN_OPTS".into(), "-Xmx512m".into());
        repo.environment_vars.insert("JAVA_HOME".into(), "/jdk".into());

        let envs = tool.environment(&repo);
        assert_eq!(envs["MAVEN_OPTS"], "-Xmx512m");
        assert_eq!(envs["JAVA_HOME"], "/jdk");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_custom_build_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MavenBuildTool::new(MavenConfig::default());

        let mut ok = repo();
        ok.custom_build_command = Some("echo BUILD SUCCESS".into());
        let result = tool.run(&ok, dir.path()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.output_tail.contains("BUILD SUCCESS"));

        let mut bad = repo();
        bad.custom_build_command = Some("echo '[ERROR] COMPILATION ERROR' >&2; exit 1".into());
        let result = tool.run(&bad, dir.path()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.output_tail.contains("COMPILATION ERROR"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_tail_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MavenBuildTool::new(MavenConfig {
            output_tail_chars: 10,
            ..MavenConfig::default()
        });
        let mut repo = repo();
        repo.custom_build_command = Some("printf 'aaaaaaaaaaaaaaaaaaaa0123456789'".into());

        let result = tool.run(&repo, dir.path()).await.unwrap();
        assert_eq!(result.output_tail, "0123456789");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_a_failed_build() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MavenBuildTool::new(MavenConfig {
            timeout: Duration::from_millis(100),
            ..MavenConfig::default()
        });
        let mut repo = repo();
        repo.custom_build_command = Some("sleep 5".into());

        let result = tool.run(&repo, dir.path()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.output_tail.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_maven_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MavenBuildTool::new(MavenConfig {
            maven_home: Some(dir.path().join("no-maven-here")),
            ..MavenConfig::default()
        });

        let err = tool.run(&repo(), dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
