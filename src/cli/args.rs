//! CLI argument definitions (clap derive)

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// phaseline - budget-aware multi-phase task orchestration
#[derive(Parser, Debug)]
#[command(name = "phaseline")]
#[command(about = "Route workflow phases across LLM backends under a hard cost budget")]
#[command(long_about = r#"
phaseline takes a free-text request through a workflow of phases
(specification, design, implementation, testing, review). Each phase is routed
to a configured backend under a hard cost budget, retried and escalated on
failure, and its file writes are recovered from the backend's output.

EXAMPLES:
  # Run the built-in feature workflow
  phaseline run --workflow feature_implementation --input "Add CSV export"

  # Exercise a workflow without calling any provider
  phaseline run --workflow quick_fix --input "Fix the date parser" --dry-run

  # Machine-readable run report
  phaseline run --workflow quick_fix --input "..." --json

  # Inspect configuration and spend
  phaseline list-workflows
  phaseline list-backends
  phaseline budget

  # Browse finished runs and iterate on one with feedback
  phaseline runs list
  phaseline runs show 3f2a9c1e
  phaseline run --continue 3f2a9c1e --feedback "Also export headers"

  # Read persisted specifications
  phaseline specs list
  phaseline specs show csv-export

CONFIGURATION:
  Settings are loaded with precedence: CLI flags > config file > defaults.
  The config file is discovered by searching upward from CWD for
  .phaseline/config.toml; use --config to point at a specific file.
  Workflows and roles come from workflows.yaml (or the built-in catalog).

EXIT CODES:
  0 success, 1 internal error, 2 invalid arguments,
  3 run failed with artifacts, 4 run failed without artifacts, 130 cancelled
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the workflow and role catalog (YAML)
    #[arg(long, global = true)]
    pub workflows: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Maximum number of phases running at once
    #[arg(long, global = true)]
    pub max_in_flight: Option<usize>,

    /// Maximum attempts per phase across all backends
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Per-call backend timeout in seconds (default: 600, min: 5)
    #[arg(long, global = true)]
    pub phase_timeout: Option<u64>,

    /// Budget limit for the current window (overrides config and environment)
    #[arg(long, global = true)]
    pub budget_limit: Option<f64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a workflow against a request
    Run(RunArgs),

    /// List workflows in the catalog
    ListWorkflows {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured backends
    ListBackends {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show spend in the current budget window
    Budget {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Persisted specifications
    #[command(subcommand)]
    Specs(SpecCommands),

    /// History of finished runs
    #[command(subcommand)]
    Runs(RunsCommands),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workflow id from the catalog (default when continuing: the previous run's)
    #[arg(long, short = 'w', required_unless_present = "continue_run")]
    pub workflow: Option<String>,

    /// The request text
    #[arg(long, short = 'i', required_unless_present_any = ["input_file", "continue_run"])]
    pub input: Option<String>,

    /// Read the request text from a file
    #[arg(long, conflicts_with = "input")]
    pub input_file: Option<PathBuf>,

    /// Iterate on a finished run (id or unique prefix)
    #[arg(
        long = "continue",
        value_name = "RUN_ID",
        requires = "feedback",
        conflicts_with_all = ["input", "input_file"]
    )]
    pub continue_run: Option<String>,

    /// What the next iteration should change
    #[arg(long, requires = "continue_run")]
    pub feedback: Option<String>,

    /// Name the specification is stored under (default: workflow id)
    #[arg(long)]
    pub spec_name: Option<String>,

    /// Use the echo backend for every profile; nothing is billed or written
    #[arg(long)]
    pub dry_run: bool,

    /// Print the full run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Directory artifacts are written to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Keep artifacts in the report only
    #[arg(long)]
    pub no_write: bool,
}

#[derive(Subcommand, Debug)]
pub enum SpecCommands {
    /// List stored specifications
    List,

    /// Print one specification
    Show {
        /// Specification name
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// List finished runs, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print one run record
    Show {
        /// Run id or unique prefix
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
