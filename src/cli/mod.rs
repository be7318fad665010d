//! Command-line interface for phaseline
//!
//! - `args`: clap argument definitions
//! - `commands`: command implementations
//!
//! [`run`] parses arguments, loads settings and the workflow catalog,
//! creates the tokio runtime and dispatches. It prints every error itself;
//! the binary only maps the returned [`ExitCode`] to the process exit.

pub mod args;
mod commands;

pub use args::{Cli, Commands, RunArgs, RunsCommands, SpecCommands};

use clap::Parser;
use phaseline_config::{CliOverrides, Settings, WorkflowCatalog};
use phaseline_utils::logging::init_tracing;
use phaseline_utils::{ExitCode, PhaselineError, UserFriendlyError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Print `err` as an actionable report and return its exit code.
fn report_error(err: &PhaselineError) -> ExitCode {
    eprintln!("✗ [{}] {}", err.category(), err.user_message());
    if let Some(context) = err.context() {
        eprintln!("  {context}");
    }
    for suggestion in err.suggestions() {
        eprintln!("  → {suggestion}");
    }
    err.to_exit_code()
}

fn overrides(cli: &Cli) -> CliOverrides {
    let output_dir = match &cli.command {
        Commands::Run(args) => args.output_dir.clone(),
        _ => None,
    };
    CliOverrides {
        config_path: cli.config.clone(),
        max_in_flight: cli.max_in_flight,
        max_attempts: cli.max_attempts,
        phase_timeout_secs: cli.phase_timeout,
        output_dir,
        budget_limit: cli.budget_limit,
    }
}

/// Main CLI execution function.
///
/// Returns `Ok(())` on exit code 0 and `Err(code)` for every other outcome,
/// after all output has been printed.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.log_json) {
        eprintln!("warning: logging not initialized: {e}");
    }

    let settings = Settings::discover(&overrides(&cli))
        .map_err(|e| report_error(&PhaselineError::from(e)))?;

    let cwd = std::env::current_dir().map_err(|e| report_error(&PhaselineError::from(e)))?;
    let catalog = WorkflowCatalog::discover(&cwd, cli.workflows.as_deref())
        .map_err(|e| report_error(&PhaselineError::from(e)))?;

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let result = rt.block_on(async {
        match cli.command {
            Commands::Run(args) => {
                let cancel = CancellationToken::new();
                let on_signal = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received, cancelling run");
                        on_signal.cancel();
                    }
                });
                commands::execute_run(&settings, &catalog, args, cancel).await
            }
            Commands::ListWorkflows { json } => commands::execute_list_workflows(&catalog, json),
            Commands::ListBackends { json } => commands::execute_list_backends(&settings, json),
            Commands::Budget { json } => commands::execute_budget(&settings, json),
            Commands::Specs(command) => commands::execute_specs(&settings, command),
            Commands::Runs(command) => commands::execute_runs(&settings, command),
        }
    });

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(err) => Err(report_error(&err)),
    }
}
