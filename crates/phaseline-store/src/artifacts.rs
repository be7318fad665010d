//! Per-run artifact store
//!
//! Every phase of a run commits its artifacts here. A phase's batch is
//! checked in full before anything is inserted, so a conflict leaves the
//! store exactly as it was. Writes to one path are serialized by the store
//! lock; a second phase targeting an already-owned path is a conflict
//! unless later phases may override earlier ones.

use camino::{Utf8Path, Utf8PathBuf};
use phaseline_extraction::{
    Artifact, ProtectedPaths, StrategyKind, is_safe_relative, normalize_path,
};
use phaseline_utils::ArtifactConflict;
use phaseline_utils::atomic_write::write_file_atomic;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::StoreError;

/// An artifact accepted into a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub path: String,
    #[serde(skip_serializing)]
    pub content: String,
    /// Task that produced the artifact
    pub task_id: String,
    pub phase: String,
    pub strategy: StrategyKind,
    pub blake3: String,
    pub bytes: usize,
}

impl StoredArtifact {
    #[must_use]
    pub fn new(artifact: Artifact, task_id: &str, phase: &str) -> Self {
        let content = normalize_line_endings(&artifact.content);
        Self {
            path: normalize_path(&artifact.path),
            blake3: blake3::hash(content.as_bytes()).to_hex().to_string(),
            bytes: content.len(),
            content,
            task_id: task_id.to_string(),
            phase: phase.to_string(),
            strategy: artifact.strategy,
        }
    }
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

#[derive(Debug, Default)]
pub struct ArtifactStore {
    artifacts: Mutex<BTreeMap<String, StoredArtifact>>,
}

impl ArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredArtifact>> {
        self.artifacts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Commit one phase's artifacts all-or-nothing.
    ///
    /// Returns the committed paths in path order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ArtifactConflict`] found; nothing is committed.
    pub fn commit_phase(
        &self,
        task_id: &str,
        phase: &str,
        artifacts: Vec<Artifact>,
        protected: &ProtectedPaths,
        allow_override: bool,
    ) -> Result<Vec<String>, ArtifactConflict> {
        let batch: Vec<StoredArtifact> = artifacts
            .into_iter()
            .map(|a| StoredArtifact::new(a, task_id, phase))
            .collect();

        let mut store = self.lock();
        for artifact in &batch {
            if !is_safe_relative(&artifact.path) {
                return Err(ArtifactConflict::UnsafePath {
                    path: artifact.path.clone(),
                });
            }
            if protected.is_protected(&artifact.path) {
                return Err(ArtifactConflict::ProtectedPath {
                    path: artifact.path.clone(),
                });
            }
            if let Some(existing) = store.get(&artifact.path)
                && existing.phase != phase
                && !allow_override
            {
                return Err(ArtifactConflict::ConcurrentWrite {
                    path: artifact.path.clone(),
                    owner: existing.phase.clone(),
                });
            }
        }

        let mut committed = Vec::with_capacity(batch.len());
        for artifact in batch {
            if let Some(previous) = store.get(&artifact.path)
                && previous.phase != phase
            {
                warn!(
                    path = %artifact.path,
                    previous_owner = %previous.phase,
                    phase,
                    "Later phase overrides artifact"
                );
            }
            debug!(path = %artifact.path, phase, bytes = artifact.bytes, "Committed artifact");
            committed.push(artifact.path.clone());
            store.insert(artifact.path.clone(), artifact);
        }
        committed.sort();
        committed.dedup();
        Ok(committed)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<StoredArtifact> {
        self.lock().get(&normalize_path(path)).cloned()
    }

    /// All artifacts in path order
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoredArtifact> {
        self.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Write every artifact under `root`. See [`materialize_artifacts`].
    ///
    /// # Errors
    ///
    /// Fails on the first refused path or write error.
    pub fn materialize(
        &self,
        root: &Utf8Path,
        protected: &ProtectedPaths,
    ) -> Result<Vec<Utf8PathBuf>, StoreError> {
        materialize_artifacts(&self.snapshot(), root, protected)
    }
}

/// Write `artifacts` under `root` with atomic replace.
///
/// Protected or escaping paths are refused again here.
///
/// # Errors
///
/// Fails on the first refused path or write error; files written before
/// the failure stay on disk.
pub fn materialize_artifacts(
    artifacts: &[StoredArtifact],
    root: &Utf8Path,
    protected: &ProtectedPaths,
) -> Result<Vec<Utf8PathBuf>, StoreError> {
    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        if !is_safe_relative(&artifact.path) || protected.is_protected(&artifact.path) {
            return Err(StoreError::Refused(artifact.path.clone()));
        }
        let target = root.join(&artifact.path);
        write_file_atomic(&target, &artifact.content).map_err(|e| StoreError::Write {
            path: target.to_string(),
            reason: format!("{e:#}"),
        })?;
        debug!(path = %target, bytes = artifact.bytes, "Materialized artifact");
        written.push(target);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact(path: &str, content: &str) -> Artifact {
        Artifact {
            path: path.to_string(),
            content: content.to_string(),
            strategy: StrategyKind::AnnotatedFence,
        }
    }

    #[test]
    fn test_commit_records_provenance_and_digest() {
        let store = ArtifactStore::new();
        let paths = store
            .commit_phase(
                "task-1",
                "implementation",
                vec![artifact("./src/b.rs", "b\r\n"), artifact("src/a.rs", "a")],
                &ProtectedPaths::builtin(),
                false,
            )
            .unwrap();
        assert_eq!(paths, vec!["src/a.rs", "src/b.rs"]);

        let b = store.get("src/b.rs").unwrap();
        assert_eq!(b.content, "b\n");
        assert_eq!(b.task_id, "task-1");
        assert_eq!(b.blake3, blake3::hash(b"b\n").to_hex().to_string());
    }

    #[test]
    fn test_conflict_commits_nothing() {
        let store = ArtifactStore::new();
        let err = store
            .commit_phase(
                "t",
                "impl",
                vec![artifact("ok.txt", "x"), artifact(".env", "SECRET=1")],
                &ProtectedPaths::builtin(),
                false,
            )
            .unwrap_err();
        assert_eq!(err, ArtifactConflict::ProtectedPath { path: ".env".into() });
        assert!(store.is_empty());
    }

    #[test]
    fn test_second_phase_cannot_take_owned_path() {
        let store = ArtifactStore::new();
        let protected = ProtectedPaths::builtin();
        store
            .commit_phase("t1", "implementation", vec![artifact("a.rs", "1")], &protected, false)
            .unwrap();
        let err = store
            .commit_phase("t2", "testing", vec![artifact("a.rs", "2")], &protected, false)
            .unwrap_err();
        assert_eq!(
            err,
            ArtifactConflict::ConcurrentWrite {
                path: "a.rs".into(),
                owner: "implementation".into()
            }
        );
        assert_eq!(store.get("a.rs").unwrap().content, "1");
    }

    #[test]
    fn test_override_by_later_phase_when_allowed() {
        let store = ArtifactStore::new();
        let protected = ProtectedPaths::builtin();
        store
            .commit_phase("t1", "implementation", vec![artifact("a.rs", "1")], &protected, true)
            .unwrap();
        store
            .commit_phase("t2", "review", vec![artifact("a.rs", "2")], &protected, true)
            .unwrap();
        let a = store.get("a.rs").unwrap();
        assert_eq!(a.content, "2");
        assert_eq!(a.phase, "review");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unsafe_path_is_conflict() {
        let store = ArtifactStore::new();
        let err = store
            .commit_phase("t", "p", vec![artifact("../x", "1")], &ProtectedPaths::empty(), false)
            .unwrap_err();
        assert!(matches!(err, ArtifactConflict::UnsafePath { .. }));
    }

    #[test]
    fn test_materialize_writes_files() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = ArtifactStore::new();
        store
            .commit_phase(
                "t",
                "p",
                vec![artifact("docs/guide.md", "# Guide")],
                &ProtectedPaths::builtin(),
                false,
            )
            .unwrap();

        let written = store.materialize(&root, &ProtectedPaths::builtin()).unwrap();
        assert_eq!(written, vec![root.join("docs/guide.md")]);
        assert_eq!(std::fs::read_to_string(&written[0]).unwrap(), "# Guide");
    }

    #[test]
    fn test_materialize_refuses_newly_protected_path() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = ArtifactStore::new();
        store
            .commit_phase("t", "p", vec![artifact("notes.md", "x")], &ProtectedPaths::empty(), false)
            .unwrap();
        let stricter = ProtectedPaths::empty().with_entries(["notes.md"]);
        assert!(matches!(
            store.materialize(&root, &stricter),
            Err(StoreError::Refused(_))
        ));
    }
}
