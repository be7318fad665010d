//! Run history: one JSON record per finished run under a directory
//!
//! Records are what `runs list/show` browse and what a continuation is
//! seeded from, so they keep phase outputs and artifact contents that the
//! printed report leaves out.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use phaseline_utils::atomic_write::write_file_atomic;
use phaseline_utils::{Cost, FailureReason, RunStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::StoreError;

const RUN_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub attempts: u32,
    pub cost: Cost,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub phase: String,
    pub blake3: String,
    pub content: String,
}

/// A finished run as kept in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub workflow_id: String,
    /// The request of the first iteration
    pub request: String,
    /// Feedback that started this iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// 1 for a fresh run, previous + 1 for a continuation
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continues: Option<Uuid>,
    pub status: RunStatus,
    pub exit_code: i32,
    pub total_cost: Cost,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseRecord>,
    pub artifacts: Vec<ArtifactRecord>,
}

impl RunRecord {
    /// Mark this record as the iteration after `previous`
    #[must_use]
    pub fn continuing(mut self, previous: &RunRecord, feedback: &str) -> Self {
        self.request = previous.request.clone();
        self.feedback = Some(feedback.to_string());
        self.iteration = previous.iteration + 1;
        self.continues = Some(previous.id);
        self
    }

    #[must_use]
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

/// `<dir>/<uuid>.json` files
#[derive(Debug, Clone)]
pub struct FsRunStore {
    dir: Utf8PathBuf,
}

impl FsRunStore {
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Write `record`, replacing any earlier copy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the file cannot be written.
    pub fn save(&self, record: &RunRecord) -> Result<Utf8PathBuf, StoreError> {
        let path = self.dir.join(format!("{}.{RUN_EXTENSION}", record.id));
        let json = serde_json::to_string_pretty(record).map_err(|e| StoreError::Write {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        write_file_atomic(&path, &json).map_err(|e| StoreError::Write {
            path: path.to_string(),
            reason: format!("{e:#}"),
        })?;
        debug!(run_id = %record.id, path = %path, "Stored run record");
        Ok(path)
    }

    fn read_record(path: &Utf8Path) -> Result<RunRecord, StoreError> {
        let content = fs::read_to_string(path).map_err(|e| StoreError::Io {
            path: path.to_string(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn record_paths(&self) -> Result<Vec<Utf8PathBuf>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.dir.to_string(),
                    source: e,
                });
            }
        };
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                path: self.dir.to_string(),
                source: e,
            })?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if path.extension() == Some(RUN_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Every readable record, oldest first. Unreadable files are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be listed.
    pub fn list(&self) -> Result<Vec<RunRecord>, StoreError> {
        let mut records = Vec::new();
        for path in self.record_paths()? {
            match Self::read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path, error = %e, "Skipping unreadable run record"),
            }
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Load the run whose id is `id` or starts with it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::RunNotFound`] when nothing matches
    /// - [`StoreError::AmbiguousRun`] when a prefix matches several runs
    pub fn load(&self, id: &str) -> Result<RunRecord, StoreError> {
        let wanted = id.trim().to_ascii_lowercase().replace('-', "");
        if wanted.is_empty() {
            return Err(StoreError::RunNotFound(id.to_string()));
        }
        let matches: Vec<Utf8PathBuf> = self
            .record_paths()?
            .into_iter()
            .filter(|path| {
                path.file_stem()
                    .is_some_and(|stem| stem.replace('-', "").starts_with(&wanted))
            })
            .collect();
        match matches.as_slice() {
            [] => Err(StoreError::RunNotFound(id.to_string())),
            [path] => Self::read_record(path),
            _ => Err(StoreError::AmbiguousRun {
                prefix: id.to_string(),
                count: matches.len(),
            }),
        }
    }
}
