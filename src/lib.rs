//! phaseline - budget-aware multi-phase task orchestration
//!
//! A free-text request goes through a workflow of phases (specification,
//! design, implementation, testing, review). Each phase is routed to one of
//! several execution backends under a hard cost budget, falls back between
//! backends on failure, and has its file writes recovered from free-form
//! output when the backend cannot emit structured operations.
//!
//! phaseline can be used in two ways:
//! - **CLI**: `phaseline run --workflow feature_implementation --input "..."`
//! - **Library**: build an [`Orchestrator`] and call
//!   [`Orchestrator::start_workflow`]
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! # See what is configured
//! phaseline list-workflows
//! phaseline list-backends
//!
//! # Exercise a whole workflow without network access
//! phaseline run --workflow quick_fix --input "Fix the date parser" --dry-run
//!
//! # Inspect spend in the current budget window
//! phaseline budget
//!
//! # Iterate on a finished run
//! phaseline runs list
//! phaseline run --continue 3f2a9c1e --feedback "Handle empty input"
//! ```
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use phaseline::{Orchestrator, OrchestratorConfig, Settings, WorkflowCatalog};
//! use phaseline::{AgentExecutor, BackendRegistry, BudgetLedger, RoutingPolicy, TaskRouter};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_toml_str("")?;
//! let catalog = WorkflowCatalog::builtin()?;
//! let registry = BackendRegistry::from_settings(&settings)?;
//! let executor = AgentExecutor::from_registry(&registry, true);
//! let router = TaskRouter::new(
//!     Arc::new(registry),
//!     RoutingPolicy::from_settings(&settings.routing),
//! );
//! let ledger = Arc::new(BudgetLedger::new(
//!     settings.budget.limit,
//!     settings.budget.alert_threshold,
//! ));
//! let orchestrator = Orchestrator::new(
//!     OrchestratorConfig::from_settings(&settings.run),
//!     catalog.roles.clone(),
//!     router,
//!     Arc::new(executor),
//!     ledger,
//! );
//! let run = orchestrator
//!     .start_workflow(catalog.workflow("quick_fix")?, "Fix the date parser")
//!     .await?;
//! println!("{} -> exit {}", run.status, run.exit_code());
//! # Ok(())
//! # }
//! ```
//!
//! # Exit Codes
//!
//! See [`ExitCode`]: 0 success, 1 internal, 2 bad arguments, 3 failed with
//! artifacts, 4 failed without artifacts, 130 cancelled.

pub mod cli;

pub use phaseline_config::{
    CliOverrides, PhaseSpec, RoleProfile, RunSettings, Settings, WorkflowCatalog,
    WorkflowDefinition,
};
pub use phaseline_engine::{
    Orchestrator, OrchestratorConfig, PhaseGraph, RunRequest, TaskInstance, WorkflowRun,
};
pub use phaseline_extraction::{
    ArtifactExtractor, Extraction, ProtectedPaths, StrategyKind, extract,
};
pub use phaseline_ledger::{BudgetLedger, LedgerSnapshot, LedgerWindow};
pub use phaseline_llm::{
    AgentExecutor, BackendProfile, BackendRegistry, CostModel, LlmBackend, LlmInvocation,
    LlmResult, ScriptStep, ScriptedBackend, TokenUsage, ToolCall,
};
pub use phaseline_router::{RoutingDecision, RoutingPolicy, RoutingRule, TaskProfile, TaskRouter};
pub use phaseline_store::{
    ArtifactStore, FsRunStore, FsSpecStore, MemorySpecStore, RunRecord, SpecStore, StoredArtifact,
};
pub use phaseline_utils::{
    ArtifactConflict, BackendError, Complexity, ConfigError, Cost, ExitCode, FailureReason, LedgerError,
    PhaselineError, RoutingFailure, RunStatus, TaskStatus, TaskType, Tier, UserFriendlyError,
};
