//! Tracing setup and phase-level log helpers
//!
//! All runtime diagnostics go through `tracing`. The CLI installs a subscriber
//! once via [`init_tracing`]; library code only emits events.

use std::time::Duration;
use tracing::{Span, error, info, info_span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise phaseline crates log at `info`, or
/// `debug` in verbose mode. `json` switches to one JSON object per event.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(verbose: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("phaseline=debug,info")
            } else {
                EnvFilter::try_new("phaseline=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Span covering every attempt of one phase within a run
pub fn phase_span(run_id: &str, phase: &str) -> Span {
    info_span!("phase", run_id = %run_id, phase = %phase)
}

pub fn log_phase_start(run_id: &str, phase: &str, backend: &str, attempt: u32) {
    info!(
        run_id = %run_id,
        phase = %phase,
        backend = %backend,
        attempt,
        "Phase dispatched"
    );
}

pub fn log_phase_complete(run_id: &str, phase: &str, cost: crate::Cost, duration: Duration) {
    info!(
        run_id = %run_id,
        phase = %phase,
        cost = %cost,
        duration_ms = duration.as_millis() as u64,
        "Phase succeeded"
    );
}

pub fn log_phase_retry(run_id: &str, phase: &str, backend: &str, attempt: u32, err: &str) {
    warn!(
        run_id = %run_id,
        phase = %phase,
        backend = %backend,
        attempt,
        error = %err,
        "Phase attempt failed, retrying"
    );
}

pub fn log_phase_error(run_id: &str, phase: &str, reason: &crate::FailureReason) {
    error!(
        run_id = %run_id,
        phase = %phase,
        reason = reason.label(),
        detail = %reason,
        "Phase failed"
    );
}
