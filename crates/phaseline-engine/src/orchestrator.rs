//! Workflow orchestrator
//!
//! Executes one workflow definition against one request. The phase graph is
//! validated before any backend call. Ready phases are dispatched onto a
//! `JoinSet` bounded by `max_in_flight`; a phase not marked `parallel` runs
//! alone. Each phase is routed, reserved, invoked, charged, extracted and
//! committed, retrying with bounded backoff and escalating to the next
//! backend when one keeps failing.
//!
//! Failure of a phase fails its transitive dependents with
//! `DependencyFailed` before they are ever routed. A budget refusal halts
//! further dispatch. Cancellation and the workflow timeout both fire the
//! run's cancellation token; in-flight reservations are rolled back.

use chrono::Utc;
use phaseline_config::{RoleProfile, RunSettings, WorkflowDefinition};
use phaseline_extraction::{ArtifactExtractor, Candidate, StrategyKind};
use phaseline_ledger::BudgetLedger;
use phaseline_llm::{
    AgentExecutor, ExecutorOutput, ExecutorPayload, InvocationContext, Message, WRITE_ARTIFACT,
};
use phaseline_router::{TaskProfile, TaskRouter};
use phaseline_store::{ArtifactStore, SpecStore};
use phaseline_utils::logging::{
    log_phase_complete, log_phase_error, log_phase_retry, log_phase_start, phase_span,
};
use phaseline_utils::{
    BackendError, ConfigError, Cost, FailureReason, RunStatus, TaskStatus, TaskType,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::graph::PhaseGraph;
use crate::prompt::{UpstreamOutput, build_messages};
use crate::resources::SpecResources;
use crate::run::{AttemptRecord, RunWarning, TaskInstance, WorkflowRun};

/// Runtime knobs for the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Total attempts per phase across all backends
    pub max_attempts: u32,
    pub max_in_flight: usize,
    /// Bound on a single backend call
    pub phase_timeout: Duration,
    /// Bound on the whole run; `None` waits indefinitely
    pub workflow_timeout: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub allow_override_by_later_phase: bool,
}

impl OrchestratorConfig {
    #[must_use]
    pub fn from_settings(run: &RunSettings) -> Self {
        Self {
            max_attempts: run.max_attempts.max(1),
            max_in_flight: run.max_in_flight.max(1),
            phase_timeout: run.phase_timeout.duration,
            workflow_timeout: Some(run.workflow_timeout),
            backoff_base: run.backoff_base,
            backoff_max: run.backoff_max,
            allow_override_by_later_phase: run.allow_override_by_later_phase,
        }
    }

    /// Delay before the `retry`-th retry (1-based) on the same backend
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1).min(16));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&RunSettings::default())
    }
}

/// The request for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub text: String,
    /// Name the specification is stored under; defaults to the workflow id
    pub spec_name: Option<String>,
}

impl RunRequest {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spec_name: None,
        }
    }

    #[must_use]
    pub fn with_spec_name(mut self, name: impl Into<String>) -> Self {
        self.spec_name = Some(name.into());
        self
    }
}

impl From<&str> for RunRequest {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for RunRequest {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseOutcome {
    Succeeded,
    /// `halt` stops any further dispatch in the run
    Failed { halt: bool },
}

struct RunState {
    tasks: Vec<TaskInstance>,
    warnings: Vec<RunWarning>,
}

/// Everything the phases of one run share
struct RunContext {
    run_id: String,
    request: String,
    spec_name: String,
    definition: WorkflowDefinition,
    state: Mutex<RunState>,
    store: ArtifactStore,
    cancel: CancellationToken,
    timed_out: AtomicBool,
}

impl RunContext {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn update<R>(&self, index: usize, f: impl FnOnce(&mut TaskInstance) -> R) -> R {
        f(&mut self.lock().tasks[index])
    }

    fn status(&self, index: usize) -> TaskStatus {
        self.lock().tasks[index].status
    }

    fn phase_name(&self, index: usize) -> &str {
        &self.definition.phases[index].name
    }

    fn warn(&self, phase: &str, message: impl Into<String>) {
        self.lock().warnings.push(RunWarning {
            phase: phase.to_string(),
            message: message.into(),
        });
    }

    fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Why a phase stopped because the run's token fired
    fn stop_reason(&self) -> FailureReason {
        if self.timed_out() {
            FailureReason::Timeout
        } else {
            FailureReason::Cancelled
        }
    }

    fn fail(&self, index: usize, reason: FailureReason, halt: bool) -> PhaseOutcome {
        log_phase_error(&self.run_id, self.phase_name(index), &reason);
        self.update(index, |t| t.fail(reason));
        PhaseOutcome::Failed { halt }
    }

    /// Outputs of every ancestor, earliest phase first
    fn upstream(&self, graph: &PhaseGraph, index: usize) -> Vec<UpstreamOutput> {
        let state = self.lock();
        graph
            .ancestors(index)
            .into_iter()
            .filter_map(|d| {
                state.tasks[d].output.as_ref().map(|text| UpstreamOutput {
                    phase: graph.name(d).to_string(),
                    text: text.clone(),
                })
            })
            .collect()
    }
}

enum Event<T> {
    Joined(Option<T>),
    Deadline,
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs workflow definitions against the shared ledger and backends
#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    roles: Arc<BTreeMap<String, RoleProfile>>,
    router: Arc<TaskRouter>,
    executor: Arc<AgentExecutor>,
    ledger: Arc<BudgetLedger>,
    extractor: Arc<ArtifactExtractor>,
    spec_store: Option<Arc<dyn SpecStore>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        roles: BTreeMap<String, RoleProfile>,
        router: TaskRouter,
        executor: Arc<AgentExecutor>,
        ledger: Arc<BudgetLedger>,
    ) -> Self {
        Self {
            config,
            roles: Arc::new(roles),
            router: Arc::new(router),
            executor,
            ledger,
            extractor: Arc::new(ArtifactExtractor::default()),
            spec_store: None,
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: ArtifactExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Persist specification phases here and offer them as a resource
    #[must_use]
    pub fn with_spec_store(mut self, store: Arc<dyn SpecStore>) -> Self {
        self.spec_store = Some(store);
        self
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    #[must_use]
    pub fn extractor(&self) -> &ArtifactExtractor {
        &self.extractor
    }

    /// Run `definition` to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the definition is invalid; no backend
    /// is called in that case. Phase failures are reported in the returned
    /// [`WorkflowRun`], not as errors.
    pub async fn start_workflow(
        &self,
        definition: &WorkflowDefinition,
        request: impl Into<RunRequest>,
    ) -> Result<WorkflowRun, ConfigError> {
        self.start_workflow_with_cancel(definition, request, CancellationToken::new())
            .await
    }

    /// Like [`Orchestrator::start_workflow`], stopping early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the definition is invalid.
    pub async fn start_workflow_with_cancel(
        &self,
        definition: &WorkflowDefinition,
        request: impl Into<RunRequest>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRun, ConfigError> {
        let graph = PhaseGraph::build(definition, &self.roles)?;
        let request = request.into();
        let run_uuid = Uuid::new_v4();
        let started_at = Utc::now();

        let tasks = definition
            .phases
            .iter()
            .map(|p| {
                let task_type = self
                    .roles
                    .get(&p.role)
                    .map_or(TaskType::Other, |r| r.task_type);
                TaskInstance::new(&p.name, &p.role, task_type)
            })
            .collect();
        let run_token = cancel.child_token();
        let ctx = Arc::new(RunContext {
            run_id: run_uuid.to_string(),
            request: request.text.clone(),
            spec_name: request
                .spec_name
                .clone()
                .unwrap_or_else(|| definition.id.clone()),
            definition: definition.clone(),
            state: Mutex::new(RunState {
                tasks,
                warnings: Vec::new(),
            }),
            store: ArtifactStore::new(),
            cancel: run_token.clone(),
            timed_out: AtomicBool::new(false),
        });
        let this = Arc::new(self.clone());

        info!(
            run_id = %ctx.run_id,
            workflow = %definition.id,
            phases = graph.len(),
            max_in_flight = self.config.max_in_flight,
            "Workflow started"
        );

        let deadline = self
            .config
            .workflow_timeout
            .map(|d| tokio::time::Instant::now() + d);
        let mut started = vec![false; graph.len()];
        let mut running: JoinSet<(usize, PhaseOutcome)> = JoinSet::new();
        let mut running_ids: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut exclusive = false;
        let mut halted = false;

        loop {
            if !halted && !run_token.is_cancelled() {
                for &i in graph.order() {
                    if exclusive || running.len() >= self.config.max_in_flight {
                        break;
                    }
                    if started[i] || ctx.status(i) != TaskStatus::Pending {
                        continue;
                    }
                    let ready = graph
                        .deps(i)
                        .iter()
                        .all(|&d| ctx.status(d) == TaskStatus::Succeeded);
                    if !ready {
                        continue;
                    }
                    let parallel = definition.phases[i].parallel;
                    // Exclusive phases wait for an idle scheduler
                    if !parallel && !running.is_empty() {
                        continue;
                    }

                    started[i] = true;
                    let upstream = ctx.upstream(&graph, i);
                    let span = phase_span(&ctx.run_id, graph.name(i));
                    let fut = run_phase(this.clone(), ctx.clone(), i, upstream).instrument(span);
                    let handle = running.spawn(fut);
                    running_ids.insert(handle.id(), i);
                    debug!(phase = graph.name(i), parallel, "Dispatched phase");
                    if !parallel {
                        exclusive = true;
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            let event = tokio::select! {
                joined = running.join_next_with_id() => Event::Joined(joined),
                () = sleep_until_deadline(deadline), if !ctx.timed_out() => Event::Deadline,
            };
            let joined = match event {
                Event::Deadline => {
                    warn!(run_id = %ctx.run_id, workflow = %definition.id, "Workflow timeout reached");
                    ctx.timed_out.store(true, Ordering::SeqCst);
                    run_token.cancel();
                    continue;
                }
                Event::Joined(None) => break,
                Event::Joined(Some(joined)) => joined,
            };

            let (index, outcome) = match joined {
                Ok((id, (index, outcome))) => {
                    running_ids.remove(&id);
                    (index, outcome)
                }
                Err(e) => {
                    let Some(index) = running_ids.remove(&e.id()) else {
                        continue;
                    };
                    let reason = FailureReason::Backend(format!("phase task aborted: {e}"));
                    (index, ctx.fail(index, reason, false))
                }
            };
            if !definition.phases[index].parallel {
                exclusive = false;
            }

            if let PhaseOutcome::Failed { halt } = outcome {
                let failed = graph.name(index).to_string();
                for dependent in graph.transitive_dependents(index) {
                    if ctx.status(dependent) == TaskStatus::Pending {
                        ctx.fail(dependent, FailureReason::DependencyFailed(failed.clone()), false);
                    }
                }
                if halt && !halted {
                    warn!(run_id = %ctx.run_id, phase = %failed, "Budget exhausted, halting dispatch");
                    halted = true;
                }
            }
        }

        let leftover = if ctx.timed_out() {
            FailureReason::Timeout
        } else if run_token.is_cancelled() {
            FailureReason::Cancelled
        } else {
            FailureReason::BudgetExceeded("run halted after the budget was exhausted".to_string())
        };
        for i in 0..graph.len() {
            if ctx.status(i) == TaskStatus::Pending {
                ctx.fail(i, leftover.clone(), false);
            }
        }

        let state = {
            let mut guard = ctx.lock();
            RunState {
                tasks: std::mem::take(&mut guard.tasks),
                warnings: std::mem::take(&mut guard.warnings),
            }
        };
        let status = if state
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Succeeded)
        {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let timed_out = ctx.timed_out();
        let run = WorkflowRun {
            id: run_uuid,
            workflow_id: definition.id.clone(),
            workflow: definition.clone(),
            request: request.text,
            status,
            cancelled: cancel.is_cancelled() && !timed_out,
            timed_out,
            tasks: state.tasks,
            artifacts: ctx.store.snapshot(),
            warnings: state.warnings,
            ledger: self.ledger.snapshot(),
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            run_id = %ctx.run_id,
            workflow = %definition.id,
            status = %run.status,
            artifacts = run.artifacts.len(),
            cost = %run.total_cost(),
            "Workflow finished"
        );
        Ok(run)
    }

    fn invocation_context(&self, ctx: &RunContext, phase: &str, messages: Vec<Message>) -> InvocationContext {
        let invocation = InvocationContext::new(&ctx.run_id, phase, messages);
        match &self.spec_store {
            Some(store) => invocation.with_resources(Arc::new(SpecResources::new(
                store.clone(),
                ctx.spec_name.clone(),
            ))),
            None => invocation,
        }
    }

    async fn drive_phase(
        &self,
        ctx: &RunContext,
        index: usize,
        upstream: Vec<UpstreamOutput>,
    ) -> PhaseOutcome {
        let phase = &ctx.definition.phases[index];
        let Some(role) = self.roles.get(&phase.role) else {
            return ctx.fail(
                index,
                FailureReason::Config(format!("unknown role '{}'", phase.role)),
                false,
            );
        };
        let messages = build_messages(role, &phase.name, &ctx.request, &upstream);
        let task = TaskProfile::from_messages(&phase.name, role.task_type, &messages);
        let per_backend = self.router.attempts_per_backend(&task);

        let mut exhausted: HashSet<String> = HashSet::new();
        let mut failures: HashMap<String, u32> = HashMap::new();
        let mut attempt = 0u32;

        loop {
            if ctx.cancel.is_cancelled() {
                return ctx.fail(index, ctx.stop_reason(), false);
            }
            attempt += 1;

            let decision = match self.router.select_backend(&task, &self.ledger, &exhausted) {
                Ok(decision) => decision,
                Err(failure) => {
                    ctx.update(index, |t| t.rejected = failure.rejected.clone());
                    return ctx.fail(
                        index,
                        FailureReason::RoutingFailure(failure.to_string()),
                        false,
                    );
                }
            };
            let backend = decision.profile.id.clone();
            ctx.update(index, |t| {
                t.transition(TaskStatus::Routed);
                t.backend = Some(backend.clone());
                t.attempts = attempt;
                t.rejected = decision.rejected.clone();
            });
            if decision.best_effort {
                warn!(phase = %phase.name, backend = %backend, "Falling back to best-effort backend");
            }

            let reservation = match self.ledger.reserve(decision.projected_cost) {
                Ok(id) => id,
                Err(e) => {
                    return ctx.fail(index, FailureReason::BudgetExceeded(e.to_string()), true);
                }
            };

            ctx.update(index, |t| t.transition(TaskStatus::Running));
            log_phase_start(&ctx.run_id, &phase.name, &backend, attempt);
            let invocation = self.invocation_context(ctx, &phase.name, messages.clone());
            let started_at = Utc::now();
            let clock = Instant::now();
            let result = self
                .executor
                .invoke(
                    &decision.profile,
                    &invocation,
                    self.config.phase_timeout,
                    &ctx.cancel,
                )
                .await;
            let mut record = AttemptRecord {
                attempt,
                backend: backend.clone(),
                projected_cost: decision.projected_cost,
                charged: Cost::ZERO,
                started_at,
                duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
                error: None,
            };

            let err = match result {
                Ok(output) => {
                    let actual = output
                        .usage
                        .map_or(decision.projected_cost, |u| decision.profile.cost.for_usage(u));
                    let receipt = match self.ledger.commit(reservation, actual) {
                        Ok(receipt) => receipt,
                        Err(e) => {
                            record.error = Some(e.to_string());
                            ctx.update(index, |t| t.attempt_log.push(record));
                            return ctx.fail(index, FailureReason::BudgetExceeded(e.to_string()), false);
                        }
                    };
                    record.charged = receipt.charged;
                    ctx.update(index, |t| {
                        t.cost_committed = t.cost_committed + receipt.charged;
                        t.overrun = t.overrun + receipt.overrun;
                        t.attempt_log.push(record);
                    });
                    if !receipt.overrun.is_zero() {
                        warn!(phase = %phase.name, overrun = %receipt.overrun, "Actual cost overran the budget");
                    }
                    return self.finish_phase(ctx, index, role, output, clock.elapsed(), receipt.charged);
                }
                Err(err) => err,
            };

            if let Err(e) = self.ledger.rollback(reservation) {
                warn!(phase = %phase.name, error = %e, "Reservation rollback failed");
            }
            record.error = Some(err.to_string());
            ctx.update(index, |t| t.attempt_log.push(record));

            if err == BackendError::Cancelled {
                return ctx.fail(index, ctx.stop_reason(), false);
            }

            let count = {
                let count = failures.entry(backend.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let escalate = !err.is_retryable() || count >= per_backend;
            if escalate {
                exhausted.insert(backend.clone());
            }
            if attempt >= self.config.max_attempts {
                return ctx.fail(index, FailureReason::Backend(err.to_string()), false);
            }

            ctx.update(index, |t| t.transition(TaskStatus::Retrying));
            log_phase_retry(&ctx.run_id, &phase.name, &backend, attempt, &err.to_string());
            if !escalate {
                let delay = self.config.backoff(count);
                tokio::select! {
                    () = ctx.cancel.cancelled() => return ctx.fail(index, ctx.stop_reason(), false),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    fn finish_phase(
        &self,
        ctx: &RunContext,
        index: usize,
        role: &RoleProfile,
        output: ExecutorOutput,
        elapsed: Duration,
        charged: Cost,
    ) -> PhaseOutcome {
        let phase = ctx.phase_name(index);
        let task_id = ctx.update(index, |t| t.id.clone());

        let (extraction, text) = match output.payload {
            ExecutorPayload::Structured { calls, text } => {
                let mut candidates = Vec::new();
                for call in calls {
                    if call.name != WRITE_ARTIFACT {
                        ctx.warn(phase, format!("ignored unsupported tool call `{}`", call.name));
                        continue;
                    }
                    match (call.str_arg("path"), call.str_arg("content")) {
                        (Some(path), Some(content)) => candidates.push(Candidate {
                            path: path.to_string(),
                            content: content.to_string(),
                            strategy: StrategyKind::ToolCall,
                            line: None,
                        }),
                        _ => ctx.warn(
                            phase,
                            format!("`{WRITE_ARTIFACT}` call without path or content ignored"),
                        ),
                    }
                }
                let text = text.unwrap_or_else(|| {
                    let paths: Vec<&str> = candidates.iter().map(|c| c.path.as_str()).collect();
                    format!("Wrote {} file(s): {}", paths.len(), paths.join(", "))
                });
                (self.extractor.admit(candidates), text)
            }
            ExecutorPayload::RawText(text) => (self.extractor.extract(&text), text),
        };

        for warning in &extraction.warnings {
            ctx.warn(phase, warning.to_string());
        }
        if let Some(conflict) = extraction.conflicts.first() {
            return ctx.fail(index, FailureReason::ArtifactConflict(conflict.to_string()), false);
        }

        let committed = match ctx.store.commit_phase(
            &task_id,
            phase,
            extraction.artifacts,
            self.extractor.protected(),
            self.config.allow_override_by_later_phase,
        ) {
            Ok(paths) => paths,
            Err(conflict) => {
                return ctx.fail(index, FailureReason::ArtifactConflict(conflict.to_string()), false);
            }
        };

        if role.task_type == TaskType::Specification
            && let Some(store) = &self.spec_store
            && !text.trim().is_empty()
        {
            match store.create(&ctx.spec_name, &text) {
                Ok(()) => debug!(phase, spec = %ctx.spec_name, "Specification persisted"),
                Err(e) => {
                    warn!(phase, error = %e, "Specification not persisted");
                    ctx.warn(phase, format!("specification not persisted: {e}"));
                }
            }
        }

        ctx.update(index, |t| {
            t.artifacts = committed;
            t.output = Some(text);
            t.transition(TaskStatus::Succeeded);
        });
        log_phase_complete(&ctx.run_id, phase, charged, elapsed);
        PhaseOutcome::Succeeded
    }
}

async fn run_phase(
    orchestrator: Arc<Orchestrator>,
    ctx: Arc<RunContext>,
    index: usize,
    upstream: Vec<UpstreamOutput>,
) -> (usize, PhaseOutcome) {
    let outcome = orchestrator.drive_phase(&ctx, index, upstream).await;
    (index, outcome)
}
