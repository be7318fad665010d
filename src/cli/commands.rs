//! Command implementations
//!
//! Every command returns the exit code to use on success paths and a
//! [`PhaselineError`] otherwise; the caller owns error printing.

use camino::Utf8PathBuf;
use chrono::Utc;
use phaseline_config::{Settings, WorkflowCatalog};
use phaseline_engine::{
    Orchestrator, OrchestratorConfig, RunRequest, WorkflowRun, continuation_request,
};
use phaseline_extraction::{ArtifactExtractor, ProtectedPaths};
use phaseline_ledger::{BudgetLedger, LedgerWindow, WindowLock};
use phaseline_llm::{AgentExecutor, BackendRegistry};
use phaseline_router::{RoutingPolicy, TaskRouter};
use phaseline_store::{
    FsRunStore, FsSpecStore, MemorySpecStore, RunRecord, SpecStore, StoreError, materialize_artifacts,
};
use phaseline_utils::{ConfigError, ExitCode, PhaselineError, TaskStatus};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::args::{RunArgs, RunsCommands, SpecCommands};

fn utf8(path: &Path, key: &str) -> Result<Utf8PathBuf, PhaselineError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).map_err(|p| {
        PhaselineError::Config(ConfigError::InvalidValue {
            key: key.to_string(),
            value: format!("{} is not valid UTF-8", p.display()),
        })
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, PhaselineError> {
    serde_json::to_string_pretty(value).map_err(|e| PhaselineError::Io(std::io::Error::other(e)))
}

/// The ledger for this process plus the window file it came from
struct Budget {
    ledger: Arc<BudgetLedger>,
    window: Option<(LedgerWindow, Utf8PathBuf)>,
}

impl Budget {
    /// Resume the persisted window when `persist` is set and a ledger path is configured.
    fn open(settings: &Settings, persist: bool) -> Result<Self, PhaselineError> {
        let budget = &settings.budget;
        match (&budget.ledger_path, persist) {
            (Some(path), true) => {
                let path = utf8(path, "budget.ledger_path")?;
                let window =
                    LedgerWindow::load_or_start(&path, Utc::now(), budget.window_hours, budget.limit)?;
                debug!(path = %path, committed = %window.committed, "Resumed budget window");
                Ok(Self {
                    ledger: Arc::new(window.to_ledger(budget.alert_threshold)),
                    window: Some((window, path)),
                })
            }
            _ => Ok(Self {
                ledger: Arc::new(BudgetLedger::new(budget.limit, budget.alert_threshold)),
                window: None,
            }),
        }
    }

    /// Lock guarding the window file across a spending run
    fn window_lock(settings: &Settings, persist: bool) -> Result<Option<WindowLock>, PhaselineError> {
        match (&settings.budget.ledger_path, persist) {
            (Some(path), true) => Ok(Some(WindowLock::open(&utf8(path, "budget.ledger_path")?)?)),
            _ => Ok(None),
        }
    }

    fn persist(&mut self) -> Result<(), PhaselineError> {
        if let Some((window, path)) = &mut self.window {
            window.record(&self.ledger);
            window.save(path)?;
        }
        Ok(())
    }
}

fn request_text(args: &RunArgs) -> Result<String, PhaselineError> {
    let text = match (&args.input, &args.input_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => String::new(),
    };
    if text.trim().is_empty() {
        return Err(ConfigError::MissingRequired("a non-empty --input or --input-file".to_string()).into());
    }
    Ok(text)
}

fn run_store(settings: &Settings) -> Result<FsRunStore, PhaselineError> {
    Ok(FsRunStore::new(utf8(&settings.run.runs_dir, "runs_dir")?))
}

/// Unknown or ambiguous ids are argument problems, not store failures.
fn load_run(store: &FsRunStore, id: &str) -> Result<RunRecord, PhaselineError> {
    store.load(id).map_err(|e| match e {
        StoreError::RunNotFound(_) | StoreError::AmbiguousRun { .. } => {
            PhaselineError::Config(ConfigError::InvalidValue {
                key: "run id".to_string(),
                value: e.to_string(),
            })
        }
        other => other.into(),
    })
}

/// `phaseline run`
pub(crate) async fn execute_run(
    settings: &Settings,
    catalog: &WorkflowCatalog,
    args: RunArgs,
    cancel: CancellationToken,
) -> Result<ExitCode, PhaselineError> {
    let runs = run_store(settings)?;
    let previous = match (&args.continue_run, &args.feedback) {
        (Some(id), Some(feedback)) => {
            if feedback.trim().is_empty() {
                return Err(ConfigError::MissingRequired("a non-empty --feedback".to_string()).into());
            }
            let previous = load_run(&runs, id)?;
            info!(run_id = %previous.id, iteration = previous.iteration + 1, "Continuing run");
            Some((previous, feedback.clone()))
        }
        _ => None,
    };
    let workflow_id = match (&args.workflow, &previous) {
        (Some(id), _) => id.clone(),
        (None, Some((previous, _))) => previous.workflow_id.clone(),
        (None, None) => return Err(ConfigError::MissingRequired("--workflow".to_string()).into()),
    };
    let workflow = catalog.workflow(&workflow_id)?;
    let text = match &previous {
        Some((previous, feedback)) => continuation_request(previous, feedback),
        None => request_text(&args)?,
    };

    let registry = BackendRegistry::from_settings(settings)?;
    let executor = AgentExecutor::from_registry(&registry, args.dry_run);
    let router = TaskRouter::new(
        Arc::new(registry),
        RoutingPolicy::from_settings(&settings.routing),
    );
    // Held until the window is saved; concurrent runs queue here.
    let mut window_lock = Budget::window_lock(settings, !args.dry_run)?;
    let _window_held = window_lock.as_mut().map(WindowLock::acquire).transpose()?;
    let mut budget = Budget::open(settings, !args.dry_run)?;
    let protected =
        ProtectedPaths::builtin().with_entries(&settings.extraction.protected_paths);
    let spec_store: Arc<dyn SpecStore> = if args.dry_run {
        Arc::new(MemorySpecStore::new())
    } else {
        Arc::new(FsSpecStore::new(utf8(&settings.run.spec_dir, "spec_dir")?))
    };

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_settings(&settings.run),
        catalog.roles.clone(),
        router,
        Arc::new(executor),
        budget.ledger.clone(),
    )
    .with_extractor(ArtifactExtractor::new(protected.clone()))
    .with_spec_store(spec_store);

    let mut request = RunRequest::new(text);
    if let Some(name) = args.spec_name {
        request = request.with_spec_name(name);
    }
    let run = orchestrator
        .start_workflow_with_cancel(workflow, request, cancel)
        .await?;
    budget.persist()?;

    if !args.dry_run {
        let mut record = run.to_record();
        if let Some((previous, feedback)) = &previous {
            record = record.continuing(previous, feedback);
        }
        let path = runs.save(&record)?;
        debug!(path = %path, iteration = record.iteration, "Run recorded");
    }

    let mut written = Vec::new();
    if !args.dry_run && !args.no_write && !run.artifacts.is_empty() {
        let root = utf8(&settings.run.output_dir, "output_dir")?;
        written = materialize_artifacts(&run.artifacts, &root, &protected)?;
        info!(count = written.len(), root = %root, "Artifacts written");
    }

    if args.json {
        println!("{}", run.to_json().map_err(|e| PhaselineError::Io(std::io::Error::other(e)))?);
    } else {
        print_run_summary(&run, &written);
    }
    Ok(run.exit_code())
}

fn print_run_summary(run: &WorkflowRun, written: &[Utf8PathBuf]) {
    println!("Run {} ({}): {}", run.id, run.workflow_id, run.status);
    println!(
        "  {:<20} {:<10} {:<18} {:>8} {:>10}",
        "PHASE", "STATUS", "BACKEND", "ATTEMPTS", "COST"
    );
    for task in &run.tasks {
        println!(
            "  {:<20} {:<10} {:<18} {:>8} {:>10}",
            task.phase,
            task.status.to_string(),
            task.backend.as_deref().unwrap_or("-"),
            task.attempts,
            task.cost_committed.to_string()
        );
        if task.status == TaskStatus::Failed
            && let Some(reason) = &task.failure
        {
            println!("    ↳ {reason}");
        }
    }

    if !run.artifacts.is_empty() {
        println!("\nArtifacts ({}):", run.artifacts.len());
        for artifact in &run.artifacts {
            let digest: String = artifact.blake3.chars().take(12).collect();
            println!("  {}  [{}] {} bytes, from {}", artifact.path, digest, artifact.bytes, artifact.phase);
        }
        if !written.is_empty() {
            println!("  written: {} file(s)", written.len());
        }
    }

    if !run.warnings.is_empty() {
        println!("\nWarnings ({}):", run.warnings.len());
        for warning in &run.warnings {
            println!("  ⚠ {}: {}", warning.phase, warning.message);
        }
    }

    let ledger = &run.ledger;
    println!(
        "\nBudget: committed {} of {} (remaining {})",
        ledger.committed,
        ledger.limit,
        ledger.remaining()
    );
    if !ledger.overrun.is_zero() {
        println!("  overrun {}", ledger.overrun);
    }
}

/// `phaseline list-workflows`
pub(crate) fn execute_list_workflows(
    catalog: &WorkflowCatalog,
    json: bool,
) -> Result<ExitCode, PhaselineError> {
    if json {
        let workflows: Vec<_> = catalog
            .workflows
            .iter()
            .map(|(id, wf)| {
                json!({
                    "id": id,
                    "description": wf.description,
                    "phases": wf.phases,
                })
            })
            .collect();
        println!("{}", to_json(&json!({ "workflows": workflows, "roles": catalog.roles }))?);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(source) = &catalog.source {
        println!("Catalog: {}", source.display());
    } else {
        println!("Catalog: built-in");
    }
    for (id, wf) in &catalog.workflows {
        println!("\n{id}");
        if !wf.description.is_empty() {
            println!("  {}", wf.description);
        }
        for phase in &wf.phases {
            let deps = if phase.depends_on.is_empty() {
                String::new()
            } else {
                format!(" after {}", phase.depends_on.join(", "))
            };
            let parallel = if phase.parallel { " (parallel)" } else { "" };
            println!("  - {} [{}]{deps}{parallel}", phase.name, phase.role);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// `phaseline list-backends`
pub(crate) fn execute_list_backends(
    settings: &Settings,
    json: bool,
) -> Result<ExitCode, PhaselineError> {
    let registry = BackendRegistry::from_settings(settings)?;
    let mut profiles: Vec<_> = registry.iter().collect();
    profiles.sort_by(|a, b| a.id.cmp(&b.id));

    if json {
        println!("{}", to_json(&json!({ "backends": profiles }))?);
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "{:<18} {:<6} {:<11} {:<28} {:>8} {:>10} {:>10}",
        "ID", "TIER", "PROVIDER", "MODEL", "CONTEXT", "IN/1K", "OUT/1K"
    );
    for p in profiles {
        let model = if p.supports_structured_output {
            format!("{} (tools)", p.model)
        } else {
            p.model.clone()
        };
        println!(
            "{:<18} {:<6} {:<11} {:<28} {:>8} {:>10.4} {:>10.4}",
            p.id,
            p.tier.to_string(),
            p.provider,
            model,
            p.context_limit,
            p.cost.input_per_1k,
            p.cost.output_per_1k
        );
    }
    if let Some(best_effort) = &settings.routing.best_effort {
        println!("\nbest effort: {best_effort}");
    }
    Ok(ExitCode::SUCCESS)
}

/// `phaseline budget`
pub(crate) fn execute_budget(settings: &Settings, json: bool) -> Result<ExitCode, PhaselineError> {
    let budget = Budget::open(settings, true)?;
    let snapshot = budget.ledger.snapshot();
    let window = budget.window.as_ref().map(|(w, path)| (w.clone(), path.clone()));

    if json {
        let report = json!({
            "ledger": snapshot,
            "remaining": snapshot.remaining(),
            "window": window.as_ref().map(|(w, path)| json!({
                "path": path.as_str(),
                "window_start": w.window_start,
                "window_end": w.window_end(),
                "window_hours": w.window_hours,
            })),
        });
        println!("{}", to_json(&report)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Limit:     {}", snapshot.limit);
    println!("Committed: {}", snapshot.committed);
    println!("Remaining: {}", snapshot.remaining());
    if !snapshot.overrun.is_zero() {
        println!("Overrun:   {}", snapshot.overrun);
    }
    match window {
        Some((w, path)) => {
            println!("Window:    {} (+{}h)", w.window_start.to_rfc3339(), w.window_hours);
            println!("Ledger:    {path}");
        }
        None => println!("Window:    not persisted (set [budget] ledger_path)"),
    }
    if snapshot.alert_fired {
        println!(
            "⚠ spend is above {:.0}% of the limit",
            snapshot.alert_threshold * 100.0
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// `phaseline specs ...`
pub(crate) fn execute_specs(
    settings: &Settings,
    command: SpecCommands,
) -> Result<ExitCode, PhaselineError> {
    let store = FsSpecStore::new(utf8(&settings.run.spec_dir, "spec_dir")?);
    match command {
        SpecCommands::List => {
            let names = store.list()?;
            if names.is_empty() {
                println!("No specifications in {}", store.dir());
            }
            for name in names {
                println!("{name}");
            }
        }
        SpecCommands::Show { name } => {
            print!("{}", store.read(&name)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// `phaseline runs ...`
pub(crate) fn execute_runs(
    settings: &Settings,
    command: RunsCommands,
) -> Result<ExitCode, PhaselineError> {
    let store = run_store(settings)?;
    match command {
        RunsCommands::List { json } => {
            let records = store.list()?;
            if json {
                let runs: Vec<_> = records
                    .iter()
                    .map(|r| {
                        json!({
                            "id": r.id,
                            "workflow_id": r.workflow_id,
                            "iteration": r.iteration,
                            "continues": r.continues,
                            "status": r.status,
                            "exit_code": r.exit_code,
                            "total_cost": r.total_cost,
                            "started_at": r.started_at,
                        })
                    })
                    .collect();
                println!("{}", to_json(&json!({ "runs": runs }))?);
                return Ok(ExitCode::SUCCESS);
            }
            if records.is_empty() {
                println!("No runs in {}", store.dir());
                return Ok(ExitCode::SUCCESS);
            }
            println!(
                "{:<10} {:<24} {:>4} {:<10} {:>10}  {}",
                "ID", "WORKFLOW", "ITER", "STATUS", "COST", "STARTED"
            );
            for r in &records {
                println!(
                    "{:<10} {:<24} {:>4} {:<10} {:>10}  {}",
                    r.short_id(),
                    r.workflow_id,
                    r.iteration,
                    r.status.to_string(),
                    r.total_cost.to_string(),
                    r.started_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        RunsCommands::Show { id, json } => {
            let record = load_run(&store, &id)?;
            if json {
                println!("{}", to_json(&record)?);
                return Ok(ExitCode::SUCCESS);
            }
            print_run_record(&record);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_run_record(record: &RunRecord) {
    println!("Run {} ({}): {}", record.id, record.workflow_id, record.status);
    println!("  iteration {}", record.iteration);
    if let Some(previous) = record.continues {
        println!("  continues {previous}");
    }
    if let Some(feedback) = &record.feedback {
        println!("  feedback: {feedback}");
    }
    println!("  cost {}, exit code {}", record.total_cost, record.exit_code);
    println!("  started {}", record.started_at.to_rfc3339());
    for phase in &record.phases {
        println!(
            "  - {:<20} {:<10} {}",
            phase.phase,
            phase.status.to_string(),
            phase.backend.as_deref().unwrap_or("-")
        );
        if let Some(reason) = &phase.failure {
            println!("    ↳ {reason}");
        }
    }
    if !record.artifacts.is_empty() {
        println!("\nArtifacts ({}):", record.artifacts.len());
        for artifact in &record.artifacts {
            println!("  {} (from {})", artifact.path, artifact.phase);
        }
    }
}
