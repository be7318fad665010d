//! Run records returned to the caller
//!
//! A [`WorkflowRun`] is the full report of one execution: per-phase state
//! with timestamped transitions, committed artifacts with their digests,
//! warnings and the ledger at the end of the run. It serializes to the JSON
//! the CLI prints with `--json`.

use chrono::{DateTime, Utc};
use phaseline_config::WorkflowDefinition;
use phaseline_ledger::LedgerSnapshot;
use phaseline_store::{ArtifactRecord, PhaseRecord, RunRecord, StoredArtifact};
use phaseline_utils::{Cost, ExitCode, FailureReason, Rejection, RunStatus, TaskStatus, TaskType};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
}

/// One attempt against one backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub backend: String,
    pub projected_cost: Cost,
    /// Amount committed to the ledger; zero when the reservation was rolled back
    pub charged: Cost,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State of one phase within a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskInstance {
    pub id: String,
    pub phase: String,
    pub role: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Backend of the latest attempt
    pub backend: Option<String>,
    pub attempts: u32,
    pub history: Vec<Transition>,
    pub attempt_log: Vec<AttemptRecord>,
    /// Candidates the router discarded on the latest attempt
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,
    pub cost_committed: Cost,
    pub overrun: Cost,
    /// Paths committed by this phase
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing)]
    pub output: Option<String>,
}

impl TaskInstance {
    #[must_use]
    pub fn new(phase: &str, role: &str, task_type: TaskType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            phase: phase.to_string(),
            role: role.to_string(),
            task_type,
            status: TaskStatus::Pending,
            backend: None,
            attempts: 0,
            history: vec![Transition {
                status: TaskStatus::Pending,
                at: Utc::now(),
            }],
            attempt_log: Vec::new(),
            rejected: Vec::new(),
            cost_committed: Cost::ZERO,
            overrun: Cost::ZERO,
            artifacts: Vec::new(),
            failure: None,
            output: None,
        }
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Illegal moves are logged and ignored; the return value says whether
    /// the status changed.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                phase = %self.phase,
                from = %self.status,
                to = %next,
                "Ignoring illegal task transition"
            );
            return false;
        }
        self.status = next;
        self.history.push(Transition {
            status: next,
            at: Utc::now(),
        });
        true
    }

    /// Terminal failure with `reason`. No-op once terminal.
    pub fn fail(&mut self, reason: FailureReason) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let moved = self.transition(TaskStatus::Failed);
        if moved {
            self.failure = Some(reason);
        }
        moved
    }

    /// First time the task entered `status`
    #[must_use]
    pub fn entered_at(&self, status: TaskStatus) -> Option<DateTime<Utc>> {
        self.history.iter().find(|t| t.status == status).map(|t| t.at)
    }

    /// Most recent time the task entered `status`
    #[must_use]
    pub fn last_entered_at(&self, status: TaskStatus) -> Option<DateTime<Utc>> {
        self.history.iter().rev().find(|t| t.status == status).map(|t| t.at)
    }

    #[must_use]
    pub fn was_routed(&self) -> bool {
        self.entered_at(TaskStatus::Routed).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunWarning {
    pub phase: String,
    pub message: String,
}

/// Report of one workflow execution
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow: WorkflowDefinition,
    pub request: String,
    pub status: RunStatus,
    pub cancelled: bool,
    pub timed_out: bool,
    /// Phases in definition order
    pub tasks: Vec<TaskInstance>,
    pub artifacts: Vec<StoredArtifact>,
    pub warnings: Vec<RunWarning>,
    pub ledger: LedgerSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WorkflowRun {
    #[must_use]
    pub fn task(&self, phase: &str) -> Option<&TaskInstance> {
        self.tasks.iter().find(|t| t.phase == phase)
    }

    #[must_use]
    pub fn artifact(&self, path: &str) -> Option<&StoredArtifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    /// Sum of every phase's committed cost
    #[must_use]
    pub fn total_cost(&self) -> Cost {
        self.tasks.iter().map(|t| t.cost_committed).sum()
    }

    #[must_use]
    pub fn failed_phases(&self) -> Vec<&TaskInstance> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect()
    }

    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::for_run(self.status, self.artifacts.len(), self.cancelled)
    }

    /// History entry for this run as a first iteration
    #[must_use]
    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            id: self.id,
            workflow_id: self.workflow_id.clone(),
            request: self.request.clone(),
            feedback: None,
            iteration: 1,
            continues: None,
            status: self.status,
            exit_code: self.exit_code().as_i32(),
            total_cost: self.total_cost(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            phases: self
                .tasks
                .iter()
                .map(|t| PhaseRecord {
                    phase: t.phase.clone(),
                    status: t.status,
                    backend: t.backend.clone(),
                    attempts: t.attempts,
                    cost: t.cost_committed,
                    failure: t.failure.clone(),
                    output: t.output.clone(),
                })
                .collect(),
            artifacts: self
                .artifacts
                .iter()
                .map(|a| ArtifactRecord {
                    path: a.path.clone(),
                    phase: a.phase.clone(),
                    blake3: a.blake3.clone(),
                    content: a.content.clone(),
                })
                .collect(),
        }
    }

    /// Pretty JSON report
    ///
    /// # Errors
    ///
    /// Only fails if serialization itself fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
