//! Child process execution with a timeout

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Why a command produced no exit status
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The program ran past its deadline and was killed
    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Program name
        program: String,
        /// Deadline
        timeout: Duration,
    },

    /// Waiting for the program failed
    #[error("failed to wait for {program}: {source}")]
    Wait {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Exit code; `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Whether the command exited with status 0
    pub success: bool,
    /// Wall-clock time
    pub duration: Duration,
}

impl CommandOutput {
    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Run `program` with `args` in `cwd`, killing it once `timeout` passes.
pub async fn run(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    envs: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(envs)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!(program, args = ?args, cwd = ?cwd, "Running command");

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProcessError::Timeout {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|source| ProcessError::Wait {
            program: program.to_string(),
            source,
        })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
        duration: start.elapsed(),
    })
}

/// Program and arguments running `command` through the platform shell
pub fn shell(command: &str) -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        ("cmd", vec!["/C".to_string(), command.to_string()])
    } else {
        ("sh", vec!["-c".to_string(), command.to_string()])
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(command: &str) -> Vec<String> {
        shell(command).1
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let out = run(
            "sh",
            &sh("echo out; echo err >&2; exit 3"),
            None,
            &BTreeMap::new(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.combined(), "out\nerr\n");
    }

    #[tokio::test]
    async fn test_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut envs = BTreeMap::new();
        envs.insert("CONVEYOR_TEST_VAR".to_string(), "42".to_string());
        let out = run(
            "sh",
            &sh("echo $CONVEYOR_TEST_VAR; pwd"),
            Some(dir.path()),
            &envs,
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(out.success);
        assert!(out.stdout.starts_with("42\n"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = run(
            "sh",
            &sh("sleep 5"),
            None,
            &BTreeMap::new(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run(
            "conveyor-definitely-not-installed",
            &[],
            None,
            &BTreeMap::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
