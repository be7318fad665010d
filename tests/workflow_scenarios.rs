//! End-to-end workflow scenarios against scripted backends
//!
//! Every test builds its own registry, ledger and workflow so costs and
//! backend behaviour are exact. Backends are in-process; nothing touches the
//! network or the filesystem.
//!
//! Covered:
//! - sequential budget accounting
//! - routing refusal when nothing fits the remaining budget
//! - duplicate artifact paths within one output
//! - retry then escalation to the next backend
//! - protected paths failing a phase and its dependents
//! - cancellation, workflow timeout, parallel and exclusive phases
//! - specification persistence and resource reads on the tool path

use async_trait::async_trait;
use phaseline::{
    AgentExecutor, ArtifactExtractor, BackendError, BackendProfile, BackendRegistry,
    BudgetLedger, Cost, CostModel, ExitCode, FailureReason, LlmBackend, LlmInvocation,
    LlmResult, MemorySpecStore, Orchestrator, OrchestratorConfig, PhaseSpec, ProtectedPaths,
    RoleProfile, RoutingPolicy, RunRequest, RunStatus, ScriptStep, ScriptedBackend, SpecStore,
    StrategyKind, TaskRouter, TaskStatus, TaskType, Tier, TokenUsage, ToolCall,
    WorkflowDefinition,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A plain-text backend charging only for output tokens
fn text_backend(id: &str, output_per_1k: f64) -> BackendProfile {
    BackendProfile {
        id: id.to_string(),
        tier: Tier::Local,
        provider: "scripted".to_string(),
        model: format!("{id}-model"),
        supports_structured_output: false,
        cost: CostModel {
            input_per_1k: 0.0,
            output_per_1k,
        },
        context_limit: 100_000,
        max_output_tokens: None,
        base_url: None,
        api_key_env: None,
    }
}

fn tool_backend(id: &str) -> BackendProfile {
    BackendProfile {
        tier: Tier::Cloud,
        supports_structured_output: true,
        ..text_backend(id, 0.0)
    }
}

fn role(task_type: TaskType) -> RoleProfile {
    RoleProfile {
        title: "Engineer".to_string(),
        goal: "Do the phase well".to_string(),
        backstory: String::new(),
        task_type,
    }
}

fn roles() -> BTreeMap<String, RoleProfile> {
    BTreeMap::from([
        ("worker".to_string(), role(TaskType::Other)),
        ("writer".to_string(), role(TaskType::Specification)),
    ])
}

fn phase(name: &str, depends_on: &[&str]) -> PhaseSpec {
    PhaseSpec {
        name: name.to_string(),
        role: "worker".to_string(),
        depends_on: depends_on.iter().map(|d| (*d).to_string()).collect(),
        parallel: false,
    }
}

fn workflow(id: &str, phases: Vec<PhaseSpec>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        description: String::new(),
        phases,
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_attempts: 3,
        max_in_flight: 4,
        phase_timeout: Duration::from_secs(5),
        workflow_timeout: None,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        allow_override_by_later_phase: false,
    }
}

fn output_tokens(n: u64) -> TokenUsage {
    TokenUsage {
        input_tokens: 0,
        output_tokens: n,
    }
}

struct Harness {
    profiles: Vec<BackendProfile>,
    backends: Vec<(String, Arc<ScriptedBackend>)>,
    policy: RoutingPolicy,
    ledger: Arc<BudgetLedger>,
    config: OrchestratorConfig,
}

impl Harness {
    fn new(ledger: BudgetLedger) -> Self {
        Self {
            profiles: Vec::new(),
            backends: Vec::new(),
            policy: RoutingPolicy::new(Vec::<String>::new()),
            ledger: Arc::new(ledger),
            config: fast_config(),
        }
    }

    fn backend(mut self, profile: BackendProfile, script: ScriptedBackend) -> Self {
        let id = profile.id.clone();
        self.policy.default.push(id.clone());
        self.profiles.push(profile);
        self.backends.push((id, Arc::new(script)));
        self
    }

    fn scripted(&self, id: &str) -> Arc<ScriptedBackend> {
        self.backends
            .iter()
            .find(|(b, _)| b == id)
            .map(|(_, s)| s.clone())
            .unwrap()
    }

    fn orchestrator(&self) -> Orchestrator {
        let registry = BackendRegistry::from_profiles(self.profiles.clone()).unwrap();
        let mut executor = AgentExecutor::new();
        for (id, backend) in &self.backends {
            executor.register(id.clone(), backend.clone());
        }
        Orchestrator::new(
            self.config.clone(),
            roles(),
            TaskRouter::new(Arc::new(registry), self.policy.clone()),
            Arc::new(executor),
            self.ledger.clone(),
        )
    }
}

fn budget(limit: f64) -> BudgetLedger {
    BudgetLedger::new(Cost::from_units(limit), 0.8)
}

#[tokio::test]
async fn test_sequential_phases_commit_actual_costs() {
    // 2000-token output allowance at 1.0/1k projects 2.0; each reply bills 3.0
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("meter", 1.0),
        ScriptedBackend::repeating(ScriptStep::TextWithUsage(
            "done".to_string(),
            output_tokens(3_000),
        )),
    );
    let wf = workflow(
        "three_step",
        vec![
            phase("one", &[]),
            phase("two", &["one"]),
            phase("three", &["two"]),
        ],
    );

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Build a todo CLI")
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.exit_code(), ExitCode::SUCCESS);
    assert_eq!(run.ledger.committed, Cost::from_units(9.0));
    assert_eq!(run.ledger.reserved, Cost::ZERO);
    assert_eq!(run.ledger.outstanding_reservations, 0);
    assert_eq!(run.total_cost(), Cost::from_units(9.0));
    for task in &run.tasks {
        assert_eq!(task.cost_committed, Cost::from_units(3.0));
        assert_eq!(task.attempts, 1);
    }

    // A dependent is only routed once its dependency has succeeded
    let one_done = run.task("one").unwrap().entered_at(TaskStatus::Succeeded).unwrap();
    let two_routed = run.task("two").unwrap().entered_at(TaskStatus::Routed).unwrap();
    assert!(two_routed >= one_done);
    assert_eq!(harness.scripted("meter").call_count(), 3);
}

#[tokio::test]
async fn test_nothing_fits_remaining_budget() {
    // remaining 2.0, cheapest projection 5.0
    let ledger = BudgetLedger::with_committed(
        Cost::from_units(10.0),
        0.8,
        Cost::from_units(8.0),
        Cost::ZERO,
    );
    let harness = Harness::new(ledger).backend(
        text_backend("pricey", 2.5),
        ScriptedBackend::repeating(ScriptStep::Text("never".to_string())),
    );
    let wf = workflow("single", vec![phase("only", &[])]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Anything")
        .await
        .unwrap();

    let task = run.task("only").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(matches!(task.failure, Some(FailureReason::RoutingFailure(_))));
    assert_eq!(task.rejected.len(), 1);
    assert!(!task.history.iter().any(|t| t.status == TaskStatus::Running));
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.exit_code(), ExitCode::FAILED_NO_ARTIFACTS);
    assert_eq!(run.ledger.committed, Cost::from_units(8.0));
    assert_eq!(run.ledger.reserved, Cost::ZERO);
    assert_eq!(harness.scripted("pricey").call_count(), 0);
}

#[tokio::test]
async fn test_duplicate_fence_keeps_first_and_warns() {
    let reply = "Here you go.\n\n```text path=a.txt\nfirst\n```\n\n```text path=a.txt\nsecond\n```\n";
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::new([ScriptStep::Text(reply.to_string())]),
    );
    let wf = workflow("single", vec![phase("write", &[])]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Write a.txt")
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.artifacts.len(), 1);
    let artifact = run.artifact("a.txt").unwrap();
    assert_eq!(artifact.content, "first");
    assert_eq!(artifact.phase, "write");
    assert_eq!(run.warnings.len(), 1);
    assert_eq!(run.warnings[0].phase, "write");
    assert!(run.warnings[0].message.contains("a.txt"));
    assert_eq!(run.task("write").unwrap().artifacts, vec!["a.txt".to_string()]);
}

#[tokio::test]
async fn test_timeouts_escalate_to_next_backend() {
    let mut harness = Harness::new(budget(10.0))
        .backend(
            text_backend("a", 1.0),
            ScriptedBackend::new([ScriptStep::Hang, ScriptStep::Hang]),
        )
        .backend(
            text_backend("b", 0.5),
            ScriptedBackend::new([ScriptStep::TextWithUsage(
                "ok".to_string(),
                output_tokens(2_000),
            )]),
        );
    harness.config.phase_timeout = Duration::from_millis(50);
    let wf = workflow("single", vec![phase("impl", &[])]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Implement it")
        .await
        .unwrap();

    let task = run.task("impl").unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempts, 3);
    assert_eq!(task.backend.as_deref(), Some("b"));
    let backends: Vec<&str> = task.attempt_log.iter().map(|a| a.backend.as_str()).collect();
    assert_eq!(backends, vec!["a", "a", "b"]);
    assert!(task.attempt_log[..2].iter().all(|a| a.charged == Cost::ZERO && a.error.is_some()));
    assert!(task.history.iter().any(|t| t.status == TaskStatus::Retrying));

    // Only b's actual cost is charged; a's reservations were released
    assert_eq!(run.ledger.committed, Cost::from_units(1.0));
    assert_eq!(run.ledger.reserved, Cost::ZERO);
    assert_eq!(harness.scripted("a").call_count(), 2);
    assert_eq!(harness.scripted("b").call_count(), 1);
}

#[tokio::test]
async fn test_protected_write_fails_phase_and_dependents() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::new([
            ScriptStep::Text("```text path=docs/design.md\n# Design\n```\n".to_string()),
            ScriptStep::Text("```rust path=orchestrator_core\nfn main() {}\n```\n".to_string()),
        ]),
    );
    let orchestrator = harness
        .orchestrator()
        .with_extractor(ArtifactExtractor::new(
            ProtectedPaths::builtin().with_entries(["orchestrator_core"]),
        ));
    let wf = workflow(
        "feature",
        vec![
            phase("design", &[]),
            phase("implement", &["design"]),
            phase("test", &["implement"]),
        ],
    );

    let run = orchestrator.start_workflow(&wf, "Add a feature").await.unwrap();

    assert_eq!(run.task("design").unwrap().status, TaskStatus::Succeeded);
    let implement = run.task("implement").unwrap();
    assert_eq!(implement.status, TaskStatus::Failed);
    assert!(matches!(
        &implement.failure,
        Some(FailureReason::ArtifactConflict(msg)) if msg.contains("orchestrator_core")
    ));
    let test = run.task("test").unwrap();
    assert_eq!(test.status, TaskStatus::Failed);
    assert_eq!(
        test.failure,
        Some(FailureReason::DependencyFailed("implement".to_string()))
    );
    assert!(!test.was_routed());

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.artifact("docs/design.md").is_some());
    assert!(run.artifact("orchestrator_core").is_none());
    assert_eq!(run.exit_code(), ExitCode::PARTIAL_FAILURE);
    assert_eq!(harness.scripted("local").call_count(), 2);
}

#[tokio::test]
async fn test_failure_skips_transitive_dependents_only() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::new([
            ScriptStep::Fail(BackendError::ProviderAuth("bad key".to_string())),
            ScriptStep::Fail(BackendError::ProviderAuth("bad key".to_string())),
            ScriptStep::Fail(BackendError::ProviderAuth("bad key".to_string())),
            ScriptStep::Text("side done".to_string()),
        ]),
    );
    let mut side = phase("side", &[]);
    side.parallel = true;
    let wf = workflow(
        "diamond",
        vec![
            phase("root", &[]),
            phase("child", &["root"]),
            phase("grandchild", &["child"]),
            side,
        ],
    );

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Go")
        .await
        .unwrap();

    let root = run.task("root").unwrap();
    assert!(matches!(root.failure, Some(FailureReason::Backend(_))));
    // With no other candidate the failed backend is re-offered up to the attempt limit
    assert_eq!(root.attempts, 3);
    assert_eq!(
        run.task("child").unwrap().failure,
        Some(FailureReason::DependencyFailed("root".to_string()))
    );
    assert_eq!(
        run.task("grandchild").unwrap().failure,
        Some(FailureReason::DependencyFailed("root".to_string()))
    );
    assert_eq!(run.task("side").unwrap().status, TaskStatus::Succeeded);
    assert_eq!(run.failed_phases().len(), 3);
}

#[tokio::test]
async fn test_cancellation_stops_running_and_pending_phases() {
    let mut harness = Harness::new(budget(10.0)).backend(
        text_backend("slow", 1.0),
        ScriptedBackend::repeating(ScriptStep::Hang),
    );
    harness.config.phase_timeout = Duration::from_secs(30);
    let wf = workflow("pair", vec![phase("first", &[]), phase("second", &["first"])]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let run = harness
        .orchestrator()
        .start_workflow_with_cancel(&wf, "Go", cancel)
        .await
        .unwrap();

    assert!(run.cancelled);
    assert!(!run.timed_out);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.task("first").unwrap().failure, Some(FailureReason::Cancelled));
    assert_eq!(run.task("second").unwrap().status, TaskStatus::Failed);
    assert!(!run.task("second").unwrap().was_routed());
    assert_eq!(run.exit_code(), ExitCode::CANCELLED);
    assert_eq!(run.ledger.reserved, Cost::ZERO);
    assert_eq!(run.ledger.committed, Cost::ZERO);
}

#[tokio::test]
async fn test_workflow_timeout_fails_with_timeout() {
    let mut harness = Harness::new(budget(10.0)).backend(
        text_backend("slow", 0.0),
        ScriptedBackend::repeating(ScriptStep::Hang),
    );
    harness.config.phase_timeout = Duration::from_secs(30);
    harness.config.workflow_timeout = Some(Duration::from_millis(80));
    let wf = workflow("pair", vec![phase("first", &[]), phase("second", &["first"])]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Go")
        .await
        .unwrap();

    assert!(run.timed_out);
    assert!(!run.cancelled);
    assert_eq!(run.task("first").unwrap().failure, Some(FailureReason::Timeout));
    assert_eq!(run.task("second").unwrap().status, TaskStatus::Failed);
    assert_eq!(run.exit_code(), ExitCode::FAILED_NO_ARTIFACTS);
}

#[tokio::test]
async fn test_parallel_phases_overlap() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::repeating(ScriptStep::Text("done".to_string()))
            .with_delay(Duration::from_millis(150)),
    );
    let mut left = phase("left", &[]);
    left.parallel = true;
    let mut right = phase("right", &[]);
    right.parallel = true;
    let wf = workflow("fan_out", vec![left, right]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Go")
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    let left = run.task("left").unwrap();
    let right = run.task("right").unwrap();
    assert!(right.entered_at(TaskStatus::Running).unwrap() < left.entered_at(TaskStatus::Succeeded).unwrap());
    assert!(left.entered_at(TaskStatus::Running).unwrap() < right.entered_at(TaskStatus::Succeeded).unwrap());
}

#[tokio::test]
async fn test_non_parallel_phases_run_alone() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::repeating(ScriptStep::Text("done".to_string()))
            .with_delay(Duration::from_millis(20)),
    );
    let wf = workflow("independent", vec![phase("a", &[]), phase("b", &[])]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Go")
        .await
        .unwrap();

    let a = run.task("a").unwrap();
    let b = run.task("b").unwrap();
    assert!(b.entered_at(TaskStatus::Routed).unwrap() >= a.entered_at(TaskStatus::Succeeded).unwrap());
}

#[tokio::test]
async fn test_specification_phase_is_persisted() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::new([ScriptStep::Text("# Todo CLI\n\nAdd and list items.".to_string())]),
    );
    let store = Arc::new(MemorySpecStore::new());
    let orchestrator = harness.orchestrator().with_spec_store(store.clone());
    let mut spec = phase("specification", &[]);
    spec.role = "writer".to_string();
    let wf = workflow("spec_only", vec![spec]);

    let run = orchestrator
        .start_workflow(&wf, RunRequest::new("Build a todo CLI").with_spec_name("todo cli"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(store.read("todo cli").unwrap(), "# Todo CLI\n\nAdd and list items.");
    assert!(run.artifacts.is_empty());
}

#[tokio::test]
async fn test_upstream_output_reaches_dependent_prompt() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::new([
            ScriptStep::Text("use sqlite for storage".to_string()),
            ScriptStep::Text("implemented".to_string()),
        ]),
    );
    let wf = workflow("pair", vec![phase("design", &[]), phase("build", &["design"])]);

    harness
        .orchestrator()
        .start_workflow(&wf, "Go")
        .await
        .unwrap();

    let invocations = harness.scripted("local").invocations();
    assert_eq!(invocations.len(), 2);
    let prompt = invocations[1].last_user_message().unwrap();
    assert!(prompt.contains("design"));
    assert!(prompt.contains("use sqlite for storage"));
}

#[tokio::test]
async fn test_specification_reaches_every_later_phase() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::new([
            ScriptStep::Text("items have a title and a due date".to_string()),
            ScriptStep::Text("struct Item".to_string()),
            ScriptStep::Text("tests pass".to_string()),
        ]),
    );
    let wf = workflow(
        "chain",
        vec![
            phase("spec", &[]),
            phase("implement", &["spec"]),
            phase("test", &["implement"]),
        ],
    );

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Todo list")
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);

    let invocations = harness.scripted("local").invocations();
    let prompt = invocations[2].last_user_message().unwrap();
    assert!(prompt.contains("items have a title and a due date"));
    assert!(prompt.contains("struct Item"));
    let spec_at = prompt.find("Output of phase `spec`").unwrap();
    let impl_at = prompt.find("Output of phase `implement`").unwrap();
    assert!(spec_at < impl_at);
}

#[tokio::test]
async fn test_tool_calls_become_artifacts() {
    let harness = Harness::new(budget(10.0)).backend(
        tool_backend("cloud"),
        ScriptedBackend::new([ScriptStep::Tools(vec![
            ToolCall::write_artifact("src/lib.rs", "pub fn answer() -> u32 { 42 }\n"),
            ToolCall::new("delete_file", json!({ "path": "Cargo.toml" })),
            ToolCall::new("write_artifact", json!({ "path": "missing_content.rs" })),
        ])]),
    );
    let wf = workflow("single", vec![phase("implement", &[])]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Answer")
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.artifacts.len(), 1);
    let artifact = run.artifact("src/lib.rs").unwrap();
    assert_eq!(artifact.strategy, StrategyKind::ToolCall);
    assert_eq!(run.warnings.len(), 2);
    assert!(run.warnings[0].message.contains("delete_file"));
    assert_eq!(
        run.task("implement").unwrap().output.as_deref(),
        Some("Wrote 1 file(s): src/lib.rs")
    );
}

#[tokio::test]
async fn test_resource_read_serves_current_specification() {
    let harness = Harness::new(budget(10.0)).backend(
        tool_backend("cloud"),
        ScriptedBackend::new([
            ScriptStep::Tools(vec![ToolCall::new(
                "read_resource",
                json!({ "name": "current_specification" }),
            )]),
            ScriptStep::Text("reviewed".to_string()),
        ]),
    );
    let store = Arc::new(MemorySpecStore::new());
    store.create("review_only", "The CLI stores items in todo.json").unwrap();
    let orchestrator = harness.orchestrator().with_spec_store(store);
    let wf = workflow("review_only", vec![phase("review", &[])]);

    let run = orchestrator.start_workflow(&wf, "Review").await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    let invocations = harness.scripted("cloud").invocations();
    assert_eq!(invocations.len(), 2);
    let served = invocations[1].last_user_message().unwrap();
    assert!(served.contains("todo.json"));
}

#[tokio::test]
async fn test_attempt_limit_fails_phase() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("flaky", 0.0),
        ScriptedBackend::repeating(ScriptStep::Fail(BackendError::Transport(
            "connection reset".to_string(),
        ))),
    );
    let wf = workflow("single", vec![phase("only", &[])]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Go")
        .await
        .unwrap();

    let task = run.task("only").unwrap();
    assert_eq!(task.attempts, 3);
    assert!(matches!(
        &task.failure,
        Some(FailureReason::Backend(msg)) if msg.contains("connection reset")
    ));
    assert_eq!(harness.scripted("flaky").call_count(), 3);
    assert_eq!(run.ledger.reserved, Cost::ZERO);
}

#[tokio::test]
async fn test_invalid_workflow_is_rejected_before_any_call() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::repeating(ScriptStep::Text("x".to_string())),
    );
    let wf = workflow("cyclic", vec![phase("a", &["b"]), phase("b", &["a"])]);

    let result = harness.orchestrator().start_workflow(&wf, "Go").await;

    assert!(result.is_err());
    assert_eq!(harness.scripted("local").call_count(), 0);
}

#[tokio::test]
async fn test_run_report_serializes() {
    let harness = Harness::new(budget(10.0)).backend(
        text_backend("local", 0.0),
        ScriptedBackend::repeating(ScriptStep::Text("```text path=notes.md\nhi\n```".to_string())),
    );
    let wf = workflow("single", vec![phase("only", &[])]);

    let run = harness
        .orchestrator()
        .start_workflow(&wf, "Go")
        .await
        .unwrap();

    let report: serde_json::Value = serde_json::from_str(&run.to_json().unwrap()).unwrap();
    assert_eq!(report["workflow_id"], "single");
    assert_eq!(report["status"], "succeeded");
    assert_eq!(report["artifacts"][0]["path"], "notes.md");
    assert!(report["artifacts"][0].get("content").is_none());
}

/// Records the highest number of overlapping calls
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl LlmBackend for ConcurrencyGauge {
    async fn complete(&self, inv: LlmInvocation) -> Result<LlmResult, BackendError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(LlmResult::new(format!("{} done", inv.phase), "gauge", "gauge"))
    }
}

#[tokio::test]
async fn test_max_in_flight_bounds_parallel_phases() {
    let gauge = Arc::new(ConcurrencyGauge::default());
    let registry = BackendRegistry::from_profiles(vec![text_backend("gauge", 0.0)]).unwrap();
    let executor = AgentExecutor::new().with_backend("gauge", gauge.clone());
    let config = OrchestratorConfig {
        max_in_flight: 2,
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(
        config,
        roles(),
        TaskRouter::new(Arc::new(registry), RoutingPolicy::new(["gauge"])),
        Arc::new(executor),
        Arc::new(budget(10.0)),
    );
    let phases = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|name| PhaseSpec {
            parallel: true,
            ..phase(name, &[])
        })
        .collect();
    let wf = workflow("wide", phases);

    let run = orchestrator.start_workflow(&wf, "Go").await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    assert_eq!(run.task("c").unwrap().output.as_deref(), Some("c done"));
}

#[tokio::test]
async fn test_waiting_exclusive_phase_does_not_block_parallel_ones() {
    let gauge = Arc::new(ConcurrencyGauge::default());
    let registry = BackendRegistry::from_profiles(vec![text_backend("gauge", 0.0)]).unwrap();
    let executor = AgentExecutor::new().with_backend("gauge", gauge.clone());
    let orchestrator = Orchestrator::new(
        fast_config(),
        roles(),
        TaskRouter::new(Arc::new(registry), RoutingPolicy::new(["gauge"])),
        Arc::new(executor),
        Arc::new(budget(10.0)),
    );
    let parallel = |name: &str| PhaseSpec {
        parallel: true,
        ..phase(name, &[])
    };
    let wf = workflow(
        "mixed",
        vec![parallel("a"), phase("solo", &[]), parallel("c")],
    );

    let run = orchestrator.start_workflow(&wf, "Go").await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    let solo_routed = run.task("solo").unwrap().entered_at(TaskStatus::Routed).unwrap();
    for name in ["a", "c"] {
        let done = run.task(name).unwrap().entered_at(TaskStatus::Succeeded).unwrap();
        assert!(solo_routed >= done);
    }
}
