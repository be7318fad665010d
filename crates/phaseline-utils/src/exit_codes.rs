//! Exit code constants for the phaseline CLI.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Every phase succeeded |
//! | 1 | `INTERNAL` | Unexpected internal failure |
//! | 2 | `CLI_ARGS` | Invalid command line arguments |
//! | 3 | `PARTIAL_FAILURE` | Run failed but committed artifacts are available |
//! | 4 | `FAILED_NO_ARTIFACTS` | Run failed before producing any artifact |
//! | 130 | `CANCELLED` | Run cancelled by the operator |

use crate::types::RunStatus;
use std::fmt;

/// Process exit code.
///
/// The numeric values are part of the command line contract.
///
/// ```rust
/// use phaseline_utils::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::from_i32(3), ExitCode::PARTIAL_FAILURE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const INTERNAL: ExitCode = ExitCode(1);
    pub const CLI_ARGS: ExitCode = ExitCode(2);
    pub const PARTIAL_FAILURE: ExitCode = ExitCode(3);
    pub const FAILED_NO_ARTIFACTS: ExitCode = ExitCode(4);
    pub const CANCELLED: ExitCode = ExitCode(130);

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        Self(code)
    }

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Map a finished run onto the exit code table.
    #[must_use]
    pub const fn for_run(status: RunStatus, artifact_count: usize, cancelled: bool) -> Self {
        match status {
            RunStatus::Succeeded => Self::SUCCESS,
            _ if cancelled => Self::CANCELLED,
            _ if artifact_count > 0 => Self::PARTIAL_FAILURE,
            _ => Self::FAILED_NO_ARTIFACTS,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_run_mapping() {
        assert_eq!(
            ExitCode::for_run(RunStatus::Succeeded, 0, false),
            ExitCode::SUCCESS
        );
        assert_eq!(
            ExitCode::for_run(RunStatus::Failed, 2, false),
            ExitCode::PARTIAL_FAILURE
        );
        assert_eq!(
            ExitCode::for_run(RunStatus::Failed, 0, false),
            ExitCode::FAILED_NO_ARTIFACTS
        );
        assert_eq!(
            ExitCode::for_run(RunStatus::Failed, 5, true),
            ExitCode::CANCELLED
        );
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            ExitCode::SUCCESS,
            ExitCode::INTERNAL,
            ExitCode::CLI_ARGS,
            ExitCode::PARTIAL_FAILURE,
            ExitCode::FAILED_NO_ARTIFACTS,
            ExitCode::CANCELLED,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
