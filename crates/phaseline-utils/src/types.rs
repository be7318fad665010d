//! Value types shared across the phaseline crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

/// Monetary amount in integer micro-units (1.0 = 1 000 000).
///
/// All budget arithmetic happens on this type so that reserving and
/// committing the same amounts is exact. Subtraction saturates at zero.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cost(u64);

impl Cost {
    pub const ZERO: Cost = Cost(0);
    pub const MICROS_PER_UNIT: u64 = 1_000_000;

    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Convert a decimal amount into micro-units, rounding to the nearest micro.
    ///
    /// Negative, NaN and infinite inputs become zero.
    #[must_use]
    pub fn from_units(units: f64) -> Self {
        if !units.is_finite() || units <= 0.0 {
            return Self::ZERO;
        }
        Self((units * Self::MICROS_PER_UNIT as f64).round() as u64)
    }

    #[must_use]
    pub const fn micros(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn as_units(self) -> f64 {
        self.0 as f64 / Self::MICROS_PER_UNIT as f64
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn checked_add(self, other: Cost) -> Option<Cost> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Cost(v)),
            None => None,
        }
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Cost {
    type Output = Cost;

    fn sub(self, rhs: Cost) -> Cost {
        Cost(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Cost {
        iter.fold(Cost::ZERO, Add::add)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.as_units())
    }
}

/// Where a backend runs. Local backends never cost anything.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    Local,
    Cloud,
}

/// Kind of work a phase performs; drives routing and output allowances.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskType {
    Specification,
    Design,
    Implementation,
    Testing,
    Review,
    Other,
}

/// Complexity class assigned by the router's heuristic.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Lifecycle of a single phase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Routed,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether moving from `self` to `next` follows the task state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Routed)
                | (Pending, Failed)
                | (Routed, Running)
                | (Routed, Failed)
                | (Running, Succeeded)
                | (Running, Retrying)
                | (Running, Failed)
                | (Retrying, Routed)
                | (Retrying, Failed)
        )
    }
}

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Why a phase ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Config(String),
    RoutingFailure(String),
    BudgetExceeded(String),
    Backend(String),
    ArtifactConflict(String),
    Cancelled,
    DependencyFailed(String),
    Timeout,
}

impl FailureReason {
    /// Short machine-readable label, used in logs and summaries.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::RoutingFailure(_) => "routing_failure",
            Self::BudgetExceeded(_) => "budget_exceeded",
            Self::Backend(_) => "backend",
            Self::ArtifactConflict(_) => "artifact_conflict",
            Self::Cancelled => "cancelled",
            Self::DependencyFailed(_) => "dependency_failed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg)
            | Self::RoutingFailure(msg)
            | Self::BudgetExceeded(msg)
            | Self::Backend(msg)
            | Self::ArtifactConflict(msg) => write!(f, "{}: {msg}", self.label()),
            Self::DependencyFailed(dep) => write!(f, "dependency '{dep}' failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Timeout => write!(f, "workflow timeout"),
        }
    }
}
