//! Configuration inputs for phaseline.
//!
//! Settings come from `.phaseline/config.toml` (or `--config`), layered as
//! CLI > file > defaults. Workflows and roles come from a YAML catalog.
//! Everything here is loaded once at startup and handed to the engine as
//! immutable values.

mod discovery;
mod model;
mod validation;
mod workflow;

pub use discovery::CliOverrides;
pub use model::{
    BackendEntry, BudgetSettings, ConfigSource, ExtractionSettings, PhaseTimeout,
    RoutingRuleEntry, RoutingSettings, RunSettings, Settings,
};
pub use workflow::{PhaseSpec, RoleProfile, WorkflowCatalog, WorkflowDefinition};
