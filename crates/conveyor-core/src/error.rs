//! Error types for conveyor-core
//!
//! Collaborator failures are caught at flow boundaries and turned into
//! failed sub-tasks; only validation errors reach the caller of
//! `dispatch` directly.

use crate::build_monitor::FailureClass;
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Task parameters rejected before any side effect
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending parameter
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// A collaborator could not be reached or answered with a transient failure
    #[error("{service} unavailable: {message}")]
    CollaboratorUnavailable {
        /// Collaborator name (`work-items`, `builds`, `git`, ...)
        service: String,
        /// Detail
        message: String,
    },

    /// A collaborator rejected the request
    #[error("{service} rejected the request: {message}")]
    Collaborator {
        /// Collaborator name
        service: String,
        /// Detail
        message: String,
    },

    /// A referenced resource does not exist
    #[error("{service}: {resource} not found")]
    NotFound {
        /// Collaborator name
        service: String,
        /// Resource description
        resource: String,
    },

    /// A build kept failing intermittently until the retry budget ran out
    #[error("build {build_id} failed intermittently after exhausting retries")]
    BuildFailureIntermittent {
        /// Last build id
        build_id: u64,
    },

    /// A build failed for a reason retries cannot fix
    #[error("build {build_id} failed: {class}")]
    BuildFailurePersistent {
        /// Last build id
        build_id: u64,
        /// Classified failure
        class: FailureClass,
    },

    /// The failure needs a code fix or a human
    #[error("build {build_id} requires escalation ({class})")]
    EscalationRequired {
        /// Last build id
        build_id: u64,
        /// Classified failure
        class: FailureClass,
        /// Where the logs live
        logs_ref: Option<String>,
    },

    /// The local build tool reported a failure
    #[error("local build failed for {repository} (exit code {exit_code:?})")]
    LocalBuildFailed {
        /// Repository name
        repository: String,
        /// Process exit code, if the tool exited normally
        exit_code: Option<i32>,
    },

    /// Work was cancelled before it completed
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Reasoning service error
    #[error("llm error: {0}")]
    Llm(#[from] conveyor_llm::Error),

    /// Memory store error
    #[error("memory error: {0}")]
    Memory(#[from] conveyor_memory::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Validation error for `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Transient collaborator failure.
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Permanent collaborator rejection.
    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether the call that produced this error may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CollaboratorUnavailable { .. } => true,
            Self::Llm(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Short machine-readable label used as a sub-task failure class.
    #[must_use]
    pub fn failure_label(&self) -> String {
        match self {
            Self::Validation { .. } => "validation".to_string(),
            Self::CollaboratorUnavailable { .. } => "collaborator-unavailable".to_string(),
            Self::Collaborator { .. } | Self::NotFound { .. } => "collaborator-error".to_string(),
            Self::BuildFailureIntermittent { .. } => {
                format!("build:{}", FailureClass::Intermittent)
            }
            Self::BuildFailurePersistent { class, .. } | Self::EscalationRequired { class, .. } => {
                format!("build:{class}")
            }
            Self::LocalBuildFailed { .. } => "local-build".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Configuration(_) => "configuration".to_string(),
            Self::Llm(e) if e.is_transient() => "collaborator-unavailable".to_string(),
            Self::Llm(_) => "reasoning-error".to_string(),
            Self::Memory(_) | Self::Internal(_) => "internal".to_string(),
        }
    }
}

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::Validation { field, message } => {
                format!("Invalid task parameter '{field}': {message}")
            }
            Error::CollaboratorUnavailable { service, .. } => {
                format!("The {service} service is currently unreachable.")
            }
            Error::Collaborator { service, message } => {
                format!("The {service} service rejected the request: {message}")
            }
            Error::NotFound { service, resource } => {
                format!("{resource} was not found in {service}.")
            }
            Error::BuildFailureIntermittent { build_id } => {
                format!("Build {build_id} kept failing intermittently after all retries.")
            }
            Error::BuildFailurePersistent { build_id, class } => {
                format!("Build {build_id} failed ({class}).")
            }
            Error::EscalationRequired { build_id, class, .. } => {
                format!("Build {build_id} needs attention ({class}).")
            }
            Error::LocalBuildFailed { repository, .. } => {
                format!("The local build of {repository} failed.")
            }
            Error::Cancelled => "The operation was cancelled.".to_string(),
            Error::Configuration(msg) => format!("Configuration error: {msg}"),
            Error::Llm(_) => "The reasoning service could not complete the request.".to_string(),
            Error::Memory(_) | Error::Internal(_) => "An internal error occurred.".to_string(),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::Validation { .. } => Some("Check the task arguments and try again.".to_string()),
            Error::CollaboratorUnavailable { service, .. } => Some(format!(
                "Check connectivity and credentials for {service}, then re-run `conveyor doctor`."
            )),
            Error::Configuration(_) => {
                Some("Review config/local.toml and CONVEYOR_* environment variables.".to_string())
            }
            Error::Llm(_) => Some(
                "Make sure the configured reasoning provider is running (`conveyor doctor`)."
                    .to_string(),
            ),
            Error::BuildFailurePersistent { .. } | Error::EscalationRequired { .. } => {
                Some("Inspect the build logs; a fix plan was recorded in memory.".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(Error::unavailable("builds", "503").is_transient());
        assert!(Error::Llm(conveyor_llm::Error::RateLimit).is_transient());
        assert!(!Error::rejected("builds", "400").is_transient());
        assert!(!Error::validation("story_id", "missing").is_transient());
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(
            Error::BuildFailurePersistent {
                build_id: 3,
                class: FailureClass::CompilationError
            }
            .failure_label(),
            "build:compilation-error"
        );
        assert_eq!(
            Error::BuildFailureIntermittent { build_id: 3 }.failure_label(),
            "build:intermittent"
        );
        assert_eq!(Error::unavailable("git", "x").failure_label(), "collaborator-unavailable");
        assert_eq!(Error::Cancelled.failure_label(), "cancelled");
    }

    #[test]
    fn test_user_message_hides_raw_detail() {
        let err = Error::unavailable("work-items", "tcp connect error: 10.0.0.5:443");
        assert!(!err.user_message().contains("10.0.0.5"));
        assert!(err.suggestion().is_some());
    }
}
