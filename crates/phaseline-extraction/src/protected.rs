//! Protected artifact paths and path normalization

use serde::Serialize;

/// Paths generated output may never target, on top of configured entries
pub const BUILTIN_PROTECTED: &[&str] = &[
    "phaseline.toml",
    ".phaseline/config.toml",
    "workflows.yaml",
    "Cargo.toml",
    "Cargo.lock",
    ".env",
    ".git/",
];

/// Normalize a candidate artifact path.
///
/// Backslashes become `/`, surrounding whitespace and quotes are trimmed,
/// and leading `./` segments are dropped.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Whether a normalized path stays inside the output root
#[must_use]
pub fn is_safe_relative(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    // Windows drive prefix such as `C:/`
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return false;
    }
    path.split('/').all(|segment| segment != "..")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedPaths {
    entries: Vec<String>,
}

impl Default for ProtectedPaths {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProtectedPaths {
    /// Only the built-in entries
    #[must_use]
    pub fn builtin() -> Self {
        Self::empty().with_entries(BUILTIN_PROTECTED.iter().copied())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_entries<S: AsRef<str>>(mut self, entries: impl IntoIterator<Item = S>) -> Self {
        for entry in entries {
            let normalized = normalize_path(entry.as_ref());
            if !normalized.is_empty() && !self.entries.contains(&normalized) {
                self.entries.push(normalized);
            }
        }
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// A path is protected when it equals an entry, ends with `/<entry>`,
    /// or lies under an entry that names a directory (trailing `/`).
    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.entries.iter().any(|entry| {
            if let Some(dir) = entry.strip_suffix('/') {
                path == dir
                    || path.starts_with(entry.as_str())
                    || path.ends_with(&format!("/{dir}"))
                    || path.contains(&format!("/{entry}"))
            } else {
                path == *entry || path.ends_with(&format!("/{entry}"))
            }
        })
    }
}
