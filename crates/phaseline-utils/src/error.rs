//! Error taxonomy for phaseline
//!
//! Each component fails with its own enum; [`PhaselineError`] aggregates them
//! for the library facade and the CLI. [`UserFriendlyError`] turns any of them
//! into an actionable report.

use crate::exit_codes::ExitCode;
use crate::types::Cost;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Trait for errors that can be rendered for a human operator
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for grouping in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Routing,
    Budget,
    Backend,
    Artifacts,
    FileSystem,
    Cancellation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Routing => write!(f, "Routing"),
            Self::Budget => write!(f, "Budget"),
            Self::Backend => write!(f, "Backend"),
            Self::Artifacts => write!(f, "Artifacts"),
            Self::FileSystem => write!(f, "File System"),
            Self::Cancellation => write!(f, "Cancellation"),
        }
    }
}

/// Malformed settings, registry, routing policy or workflow definition.
///
/// Always detected before any backend call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration file {path}: {reason}")]
    InvalidFile { path: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration validation failed ({error_count} problem(s)): {}", .errors.join("; "))]
    ValidationFailed {
        errors: Vec<String>,
        error_count: usize,
    },

    #[error("Unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("Workflow '{workflow}' is invalid: {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("Workflow '{workflow}' has a dependency cycle through: {}", .phases.join(" -> "))]
    DependencyCycle {
        workflow: String,
        phases: Vec<String>,
    },
}

impl ConfigError {
    /// Build a `ValidationFailed` from a non-empty problem list.
    #[must_use]
    pub fn validation(errors: Vec<String>) -> Self {
        let error_count = errors.len();
        Self::ValidationFailed {
            errors,
            error_count,
        }
    }
}

/// Budget ledger failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Budget exceeded: requested {requested}, available {available} of limit {limit}")]
    BudgetExceeded {
        requested: Cost,
        available: Cost,
        limit: Cost,
    },

    #[error("Unknown or already settled reservation #{0}")]
    UnknownReservation(u64),

    #[error("Ledger window file error: {0}")]
    Persistence(String),

    #[error("Budget window {path} is locked by another run")]
    WindowBusy { path: String },
}

/// Transport-level failures of a backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend call timed out after {}s", .duration.as_secs())]
    Timeout { duration: Duration },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    #[error("Provider quota exhausted: {0}")]
    ProviderQuota(String),

    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Operation not supported by backend: {0}")]
    Unsupported(String),

    #[error("Backend misconfigured: {0}")]
    Misconfiguration(String),

    #[error("Backend call cancelled")]
    Cancelled,
}

impl BackendError {
    /// Whether the same backend may be tried again after a backoff.
    ///
    /// Non-retryable errors escalate straight to the next routing candidate.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Transport(_)
                | Self::ProviderQuota(_)
                | Self::ProviderOutage(_)
                | Self::InvalidResponse(_)
        )
    }
}

/// Why the router discarded a candidate backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    UnknownBackend,
    ContextTooSmall { needed: u64, limit: u64 },
    OverBudget { projected: Cost, remaining: Cost },
    PreviouslyFailed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBackend => write!(f, "not in registry"),
            Self::ContextTooSmall { needed, limit } => {
                write!(f, "needs {needed} tokens, context limit {limit}")
            }
            Self::OverBudget {
                projected,
                remaining,
            } => write!(f, "projected cost {projected} exceeds remaining {remaining}"),
            Self::PreviouslyFailed => write!(f, "already failed for this task"),
        }
    }
}

/// One discarded candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub backend: String,
    #[serde(flatten)]
    pub reason: RejectReason,
}

/// No candidate backend survived filtering for a phase
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("No viable backend for phase '{phase}'{}", describe_rejections(.rejected))]
pub struct RoutingFailure {
    pub phase: String,
    pub rejected: Vec<Rejection>,
}

impl RoutingFailure {
    /// Whether any candidate was discarded for budget reasons
    #[must_use]
    pub fn is_budget_limited(&self) -> bool {
        self.rejected
            .iter()
            .any(|r| matches!(r.reason, RejectReason::OverBudget { .. }))
    }
}

fn describe_rejections(rejected: &[Rejection]) -> String {
    if rejected.is_empty() {
        return ": routing policy lists no candidates".to_string();
    }
    let parts: Vec<String> = rejected
        .iter()
        .map(|r| format!("{} ({})", r.backend, r.reason))
        .collect();
    format!(": {}", parts.join(", "))
}

/// Violations of the artifact write rules. Fatal to the owning phase.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactConflict {
    #[error("Artifact path '{path}' is protected")]
    ProtectedPath { path: String },

    #[error("Artifact path '{path}' was already written by phase '{owner}'")]
    ConcurrentWrite { path: String, owner: String },

    #[error("Artifact path '{path}' escapes the output directory")]
    UnsafePath { path: String },
}

impl ArtifactConflict {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::ProtectedPath { path }
            | Self::ConcurrentWrite { path, .. }
            | Self::UnsafePath { path } => path,
        }
    }
}

/// Top-level error for the library facade and CLI
#[derive(Error, Debug)]
pub enum PhaselineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Routing(#[from] RoutingFailure),

    #[error(transparent)]
    Artifact(#[from] ArtifactConflict),

    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl PhaselineError {
    /// Exit code used when this error aborts the CLI before a run report exists.
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) | Self::Routing(_) | Self::Ledger(LedgerError::BudgetExceeded { .. }) => {
                ExitCode::FAILED_NO_ARTIFACTS
            }
            Self::Cancelled | Self::Backend(BackendError::Cancelled) => ExitCode::CANCELLED,
            _ => ExitCode::INTERNAL,
        }
    }
}

impl UserFriendlyError for PhaselineError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(ConfigError::UnknownWorkflow(name)) => {
                format!("There is no workflow named '{name}'")
            }
            Self::Config(e) => format!("The configuration is not usable: {e}"),
            Self::Ledger(e) => format!("The budget ledger refused the operation: {e}"),
            Self::Backend(e) => format!("A backend call failed: {e}"),
            Self::Routing(e) => e.to_string(),
            Self::Artifact(e) => format!("Generated output was rejected: {e}"),
            Self::Store(e) => format!("Stored project data could not be used: {e}"),
            Self::Io(e) => format!("A file operation failed: {e}"),
            Self::Cancelled => "The run was cancelled".to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(_) => Some("No backend was called.".to_string()),
            Self::Routing(f) if f.is_budget_limited() => {
                Some("At least one candidate was rejected for exceeding the remaining budget.".to_string())
            }
            Self::Artifact(e) => Some(format!("Offending path: {}", e.path())),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(ConfigError::UnknownWorkflow(_)) => {
                vec!["Run `phaseline list-workflows` to see available workflows".to_string()]
            }
            Self::Config(_) => vec![
                "Check .phaseline/config.toml and workflows.yaml".to_string(),
                "Pass --config to point at a specific settings file".to_string(),
            ],
            Self::Routing(_) => vec![
                "Add a cheaper or larger-context backend to the routing rule".to_string(),
                "Designate a best_effort backend in [routing]".to_string(),
            ],
            Self::Ledger(_) => vec![
                "Inspect spend with `phaseline budget`".to_string(),
                "Raise [budget] limit or wait for the next budget window".to_string(),
            ],
            Self::Backend(BackendError::ProviderAuth(_) | BackendError::Misconfiguration(_)) => {
                vec!["Check the API key environment variable named by api_key_env".to_string()]
            }
            Self::Artifact(ArtifactConflict::ProtectedPath { .. }) => vec![
                "Protected paths are never written; adjust [extraction] protected_paths if intended"
                    .to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Ledger(_) => ErrorCategory::Budget,
            Self::Backend(BackendError::Cancelled) | Self::Cancelled => ErrorCategory::Cancellation,
            Self::Backend(_) => ErrorCategory::Backend,
            Self::Routing(_) => ErrorCategory::Routing,
            Self::Artifact(_) => ErrorCategory::Artifacts,
            Self::Store(_) | Self::Io(_) => ErrorCategory::FileSystem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_backend_errors() {
        assert!(
            BackendError::Timeout {
                duration: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(BackendError::ProviderOutage("503".into()).is_retryable());
        assert!(!BackendError::ProviderAuth("401".into()).is_retryable());
        assert!(!BackendError::Cancelled.is_retryable());
    }

    #[test]
    fn test_routing_failure_message_lists_rejections() {
        let failure = RoutingFailure {
            phase: "implementation".into(),
            rejected: vec![Rejection {
                backend: "cloud-large".into(),
                reason: RejectReason::OverBudget {
                    projected: Cost::from_units(5.0),
                    remaining: Cost::from_units(2.0),
                },
            }],
        };
        let msg = failure.to_string();
        assert!(msg.contains("implementation"));
        assert!(msg.contains("cloud-large"));
        assert!(msg.contains("5.0000"));
        assert!(failure.is_budget_limited());
    }

    #[test]
    fn test_empty_routing_failure_message() {
        let failure = RoutingFailure {
            phase: "design".into(),
            rejected: vec![],
        };
        assert!(failure.to_string().contains("no candidates"));
    }

    #[test]
    fn test_validation_failed_counts_errors() {
        let err = ConfigError::validation(vec!["a".into(), "b".into()]);
        assert!(err.to_string().contains("2 problem(s)"));
    }

    #[test]
    fn test_exit_codes_for_errors() {
        let err = PhaselineError::from(ConfigError::UnknownWorkflow("x".into()));
        assert_eq!(err.to_exit_code(), ExitCode::FAILED_NO_ARTIFACTS);
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!err.suggestions().is_empty());
        assert_eq!(PhaselineError::Cancelled.to_exit_code(), ExitCode::CANCELLED);
    }
}
