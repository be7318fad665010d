//! Atomic file writes (temp file in the target directory, fsync, rename)

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `content`.
///
/// Parent directories are created as needed. Readers observe either the old
/// file or the complete new one, never a partial write.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_str().is_empty() => p,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create parent directory: {parent}"))?;

    let mut temp_file = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in: {parent}"))?;
    temp_file
        .write_all(content.as_bytes())
        .context("Failed to write content to temporary file")?;
    temp_file
        .as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;
    temp_file
        .persist(path.as_std_path())
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move temporary file into place: {path}"))?;

    Ok(())
}
