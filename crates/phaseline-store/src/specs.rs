//! Specification store: the living requirement document of a project

use camino::{Utf8Path, Utf8PathBuf};
use phaseline_utils::atomic_write::write_file_atomic;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;
use tracing::debug;

use crate::StoreError;

const SPEC_EXTENSION: &str = "md";

pub trait SpecStore: Send + Sync {
    /// Create or replace the document called `name`
    fn create(&self, name: &str, content: &str) -> Result<(), StoreError>;

    fn read(&self, name: &str) -> Result<String, StoreError>;

    /// Stored names in sorted order
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Map a free-form name onto a safe file stem.
///
/// Keeps ASCII alphanumerics, `-` and `_`; every other run of characters
/// becomes a single `-`.
///
/// # Errors
///
/// Returns [`StoreError::InvalidName`] when nothing usable remains.
pub fn sanitize_name(name: &str) -> Result<String, StoreError> {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let out = out.trim_matches('-').to_string();
    if out.is_empty() {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(out)
}

/// Markdown files under one directory, `<dir>/<name>.md`
#[derive(Debug, Clone)]
pub struct FsSpecStore {
    dir: Utf8PathBuf,
}

impl FsSpecStore {
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        let stem = sanitize_name(name)?;
        Ok(self.dir.join(format!("{stem}.{SPEC_EXTENSION}")))
    }
}

impl SpecStore for FsSpecStore {
    fn create(&self, name: &str, content: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        write_file_atomic(&path, content).map_err(|e| StoreError::Write {
            path: path.to_string(),
            reason: format!("{e:#}"),
        })?;
        debug!(spec = name, path = %path, bytes = content.len(), "Stored specification");
        Ok(())
    }

    fn read(&self, name: &str) -> Result<String, StoreError> {
        let path = self.path_for(name)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(StoreError::Io {
                path: path.to_string(),
                source: e,
            }),
        }
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
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
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                path: self.dir.to_string(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SPEC_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-process store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemorySpecStore {
    specs: Mutex<BTreeMap<String, String>>,
}

impl MemorySpecStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpecStore for MemorySpecStore {
    fn create(&self, name: &str, content: &str) -> Result<(), StoreError> {
        let key = sanitize_name(name)?;
        self.specs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, content.to_string());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<String, StoreError> {
        let key = sanitize_name(name)?;
        self.specs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .specs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}
