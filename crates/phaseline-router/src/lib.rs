//! Task router: picks a backend for a phase attempt.
//!
//! Candidates come from the [`RoutingPolicy`] preference list for the task's
//! [`Classification`], followed by the policy's best-effort entry if any.
//! Each candidate is filtered on registry membership, context size and
//! projected cost against the ledger's remaining budget. Backends that
//! already failed this task are skipped unless nothing else survives.
//!
//! An empty result is a [`RoutingFailure`], never a cheapest-available guess.

mod classify;
mod policy;

pub use classify::{
    CHARS_PER_TOKEN, Classification, TaskProfile, classify, estimate_tokens, output_allowance,
};
pub use policy::{RoutingPolicy, RoutingRule};

use phaseline_ledger::BudgetLedger;
use phaseline_llm::{BackendProfile, BackendRegistry};
use phaseline_utils::{Cost, RejectReason, Rejection, RoutingFailure};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A routing outcome for one attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub profile: BackendProfile,
    pub classification: Classification,
    /// Amount to reserve before invoking
    pub projected_cost: Cost,
    /// Set when only the best-effort entry survived
    pub best_effort: bool,
    /// Set when the chosen backend already failed this task
    pub reoffered: bool,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone)]
pub struct TaskRouter {
    registry: Arc<BackendRegistry>,
    policy: RoutingPolicy,
}

struct Viable<'a> {
    profile: &'a BackendProfile,
    projected: Cost,
    best_effort: bool,
}

impl TaskRouter {
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>, policy: RoutingPolicy) -> Self {
        Self { registry, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Failed attempts allowed on one backend for this task before escalating
    #[must_use]
    pub fn attempts_per_backend(&self, task: &TaskProfile) -> u32 {
        let c = classify(task);
        self.policy.attempts_for(c.complexity, c.task_type)
    }

    /// Select a backend for `task`.
    ///
    /// `failed` lists backends that already exhausted their attempts for
    /// this task. They are only re-offered when no other candidate passes
    /// the filters.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingFailure`] with every rejected candidate when no
    /// backend survives filtering.
    pub fn select_backend(
        &self,
        task: &TaskProfile,
        ledger: &BudgetLedger,
        failed: &HashSet<String>,
    ) -> Result<RoutingDecision, RoutingFailure> {
        let classification = classify(task);
        let remaining = ledger.remaining();

        let mut candidates: Vec<(&str, bool)> = Vec::new();
        for id in self
            .policy
            .preferences(classification.complexity, classification.task_type)
        {
            if !candidates.iter().any(|(c, _)| *c == id.as_str()) {
                candidates.push((id.as_str(), false));
            }
        }
        if let Some(best_effort) = self.policy.best_effort.as_deref()
            && !candidates.iter().any(|(c, _)| *c == best_effort)
        {
            candidates.push((best_effort, true));
        }

        let mut rejected = Vec::new();
        let mut viable: Vec<Viable<'_>> = Vec::new();
        for (id, best_effort) in candidates {
            match self.evaluate(id, &classification, remaining) {
                Ok((profile, projected)) => viable.push(Viable {
                    profile,
                    projected,
                    best_effort,
                }),
                Err(reason) => {
                    debug!(phase = %task.phase, backend = id, reason = %reason, "Rejected routing candidate");
                    rejected.push(Rejection {
                        backend: id.to_string(),
                        reason,
                    });
                }
            }
        }

        let fresh = viable.iter().position(|v| !failed.contains(&v.profile.id));
        let (chosen, reoffered) = match fresh {
            Some(index) => {
                for skipped in viable.iter().take(index) {
                    rejected.push(Rejection {
                        backend: skipped.profile.id.clone(),
                        reason: RejectReason::PreviouslyFailed,
                    });
                }
                (viable.get(index), false)
            }
            None => (viable.first(), true),
        };

        let Some(chosen) = chosen else {
            return Err(RoutingFailure {
                phase: task.phase.clone(),
                rejected,
            });
        };

        debug!(
            phase = %task.phase,
            backend = %chosen.profile.id,
            complexity = %classification.complexity,
            projected_cost = %chosen.projected,
            reoffered,
            "Routed phase"
        );
        Ok(RoutingDecision {
            profile: chosen.profile.clone(),
            classification,
            projected_cost: chosen.projected,
            best_effort: chosen.best_effort,
            reoffered,
            rejected,
        })
    }

    fn evaluate(
        &self,
        id: &str,
        classification: &Classification,
        remaining: Cost,
    ) -> Result<(&BackendProfile, Cost), RejectReason> {
        let profile = self.registry.get(id).ok_or(RejectReason::UnknownBackend)?;
        let needed = classification.context_needed();
        if needed > profile.context_limit {
            return Err(RejectReason::ContextTooSmall {
                needed,
                limit: profile.context_limit,
            });
        }
        let projected = profile
            .cost
            .project(classification.input_tokens, classification.output_tokens);
        if projected > remaining {
            return Err(RejectReason::OverBudget {
                projected,
                remaining,
            });
        }
        Ok((profile, projected))
    }
}
