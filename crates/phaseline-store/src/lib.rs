//! Storage collaborators: the per-run artifact store, the specification
//! store used by early phases and the history of finished runs.

mod artifacts;
mod runs;
mod specs;

pub use artifacts::{ArtifactStore, StoredArtifact, materialize_artifacts};
pub use runs::{ArtifactRecord, FsRunStore, PhaseRecord, RunRecord};
pub use specs::{FsSpecStore, MemorySpecStore, SpecStore, sanitize_name};

use phaseline_utils::PhaselineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Specification '{0}' not found")]
    NotFound(String),

    #[error("'{0}' is not a usable specification name")]
    InvalidName(String),

    #[error("Refusing to write artifact '{0}'")]
    Refused(String),

    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Run id prefix '{prefix}' matches {count} runs")]
    AmbiguousRun { prefix: String, count: usize },

    #[error("Unreadable record {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<StoreError> for PhaselineError {
    fn from(err: StoreError) -> Self {
        PhaselineError::Store(err.to_string())
    }
}
