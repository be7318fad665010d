//! Shared building blocks for the phaseline workspace.
//!
//! Every other crate depends on this one for the error taxonomy, the exit
//! code table, tracing setup and the small value types (costs, task types,
//! statuses) that cross crate boundaries.

pub mod atomic_write;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod types;

pub use error::{
    ArtifactConflict, BackendError, ConfigError, ErrorCategory, LedgerError, PhaselineError,
    RejectReason, Rejection, RoutingFailure, UserFriendlyError,
};
pub use exit_codes::ExitCode;
pub use types::{Complexity, Cost, FailureReason, RunStatus, TaskStatus, TaskType, Tier};
