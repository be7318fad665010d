//! Workflow engine for phaseline.
//!
//! [`Orchestrator`] validates a [`WorkflowDefinition`](phaseline_config::WorkflowDefinition)
//! into a [`PhaseGraph`], then runs its phases through the router, ledger,
//! executor, extractor and artifact store. The result is a [`WorkflowRun`].

mod graph;
mod orchestrator;
mod prompt;
mod resources;
mod run;

pub use graph::PhaseGraph;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunRequest};
pub use prompt::{MAX_UPSTREAM_CHARS, UpstreamOutput, build_messages, continuation_request};
pub use resources::SpecResources;
pub use run::{AttemptRecord, RunWarning, TaskInstance, Transition, WorkflowRun};
