//! Artifact extraction from free-form backend output.
//!
//! Text-only backends describe files in prose. [`ArtifactExtractor`] runs an
//! ordered list of [`ExtractionStrategy`] parsers over the same text and
//! merges their candidates:
//!
//! 1. inline `write_file(path=..., content=...)` directives
//! 2. code fences annotated with a target path
//! 3. `###` headings naming a file, followed by a code fence
//!
//! For each path the earliest strategy wins; later matches are discarded
//! with a duplicate warning. Protected targets are conflicts, which fail the
//! owning phase. Escaping paths and unparseable fragments are warnings.
//!
//! Output is deterministic: identical text yields identical artifacts and
//! warnings in identical order.

mod protected;
mod strategies;

pub use protected::{BUILTIN_PROTECTED, ProtectedPaths, is_safe_relative, normalize_path};
pub use strategies::{
    AnnotatedFenceStrategy, Candidate, ExtractionStrategy, HeadingSectionStrategy,
    InlineWriteStrategy, Scan, StrategyKind, clean_content, default_strategies, is_path_token,
    looks_like_path,
};

use phaseline_utils::ArtifactConflict;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// A file the phase proposes to write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: String,
    pub content: String,
    pub strategy: StrategyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DuplicatePath,
    Unparseable,
    UnsafePath,
}

/// Non-fatal extraction finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionWarning {
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub strategy: StrategyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub detail: String,
}

impl ExtractionWarning {
    #[must_use]
    pub fn new(
        kind: WarningKind,
        path: Option<String>,
        strategy: StrategyKind,
        line: Option<usize>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path,
            strategy,
            line,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.detail, self.strategy)?;
        if let Some(path) = &self.path {
            write!(f, " [{path}]")?;
        }
        if let Some(line) = self.line {
            write!(f, " at line {line}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<ExtractionWarning>,
    pub conflicts: Vec<ArtifactConflict>,
}

impl Extraction {
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Artifacts and warnings, or the first conflict.
    ///
    /// # Errors
    ///
    /// Returns the first [`ArtifactConflict`] found.
    pub fn into_result(self) -> Result<(Vec<Artifact>, Vec<ExtractionWarning>), ArtifactConflict> {
        match self.conflicts.into_iter().next() {
            Some(conflict) => Err(conflict),
            None => Ok((self.artifacts, self.warnings)),
        }
    }
}

pub struct ArtifactExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    protected: ProtectedPaths,
}

impl ArtifactExtractor {
    /// Built-in strategies in their fixed priority order
    #[must_use]
    pub fn new(protected: ProtectedPaths) -> Self {
        Self {
            strategies: default_strategies(),
            protected,
        }
    }

    #[must_use]
    pub fn with_strategies(
        strategies: Vec<Box<dyn ExtractionStrategy>>,
        protected: ProtectedPaths,
    ) -> Self {
        Self {
            strategies,
            protected,
        }
    }

    #[must_use]
    pub fn protected(&self) -> &ProtectedPaths {
        &self.protected
    }

    /// Recover artifacts from raw backend text
    #[must_use]
    pub fn extract(&self, raw: &str) -> Extraction {
        let mut candidates = Vec::new();
        let mut warnings = Vec::new();
        for strategy in &self.strategies {
            let scan = strategy.scan(raw);
            candidates.extend(scan.candidates);
            warnings.extend(scan.warnings);
        }
        let extraction = self.admit_with(candidates, warnings);
        debug!(
            artifacts = extraction.artifacts.len(),
            warnings = extraction.warnings.len(),
            conflicts = extraction.conflicts.len(),
            "Extraction finished"
        );
        extraction
    }

    /// Apply path safety, protection and first-wins rules to candidates
    /// already in priority order (e.g. structured tool calls).
    #[must_use]
    pub fn admit(&self, candidates: Vec<Candidate>) -> Extraction {
        self.admit_with(candidates, Vec::new())
    }

    fn admit_with(
        &self,
        candidates: Vec<Candidate>,
        mut warnings: Vec<ExtractionWarning>,
    ) -> Extraction {
        let mut artifacts = Vec::new();
        let mut conflicts = Vec::new();
        let mut winners: BTreeMap<String, StrategyKind> = BTreeMap::new();

        for candidate in candidates {
            let path = normalize_path(&candidate.path);
            if !is_safe_relative(&path) {
                warnings.push(ExtractionWarning::new(
                    WarningKind::UnsafePath,
                    Some(candidate.path),
                    candidate.strategy,
                    candidate.line,
                    "path escapes the output directory",
                ));
                continue;
            }
            if self.protected.is_protected(&path) {
                let conflict = ArtifactConflict::ProtectedPath { path };
                if !conflicts.contains(&conflict) {
                    conflicts.push(conflict);
                }
                continue;
            }
            if let Some(winner) = winners.get(&path) {
                warnings.push(ExtractionWarning::new(
                    WarningKind::DuplicatePath,
                    Some(path),
                    candidate.strategy,
                    candidate.line,
                    format!("duplicate target discarded; first match from {winner} kept"),
                ));
                continue;
            }
            winners.insert(path.clone(), candidate.strategy);
            artifacts.push(Artifact {
                path,
                content: candidate.content,
                strategy: candidate.strategy,
            });
        }

        Extraction {
            artifacts,
            warnings,
            conflicts,
        }
    }
}

impl Default for ArtifactExtractor {
    fn default() -> Self {
        Self::new(ProtectedPaths::builtin())
    }
}

/// Extract with the built-in strategies against `protected`
#[must_use]
pub fn extract(raw: &str, protected: &ProtectedPaths) -> Extraction {
    ArtifactExtractor::new(protected.clone()).extract(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_duplicate_fences_keep_first() {
        let raw = "```text path=a.txt\nfirst\n```\n\n```text path=a.txt\nsecond\n```\n";
        let extraction = extract(raw, &ProtectedPaths::builtin());
        assert_eq!(extraction.artifacts.len(), 1);
        assert_eq!(extraction.artifacts[0].content, "first");
        assert_eq!(extraction.warnings.len(), 1);
        assert_eq!(extraction.warnings[0].kind, WarningKind::DuplicatePath);
        assert!(!extraction.has_conflicts());
    }

    #[test]
    fn test_priority_prefers_inline_directive() {
        let raw = "### Module (`app.py`)\n```python\nheading = True\n```\n\n```python\n# app.py\nfence = True\n```\n\nwrite_file(file_path=\"app.py\", content=\"inline = True\")\n";
        let extraction = extract(raw, &ProtectedPaths::builtin());
        assert_eq!(extraction.artifacts.len(), 1);
        assert_eq!(extraction.artifacts[0].content, "inline = True");
        assert_eq!(extraction.artifacts[0].strategy, StrategyKind::InlineWrite);
        let dupes: Vec<StrategyKind> = extraction
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::DuplicatePath)
            .map(|w| w.strategy)
            .collect();
        assert_eq!(
            dupes,
            vec![StrategyKind::AnnotatedFence, StrategyKind::HeadingSection]
        );
    }

    #[test]
    fn test_protected_path_is_conflict() {
        let protected = ProtectedPaths::builtin().with_entries(["orchestrator_core"]);
        let raw = "```text path=orchestrator_core\nrm -rf\n```\n```text path=notes.md\nok\n```\n";
        let extraction = extract(raw, &protected);
        assert_eq!(
            extraction.conflicts,
            vec![ArtifactConflict::ProtectedPath {
                path: "orchestrator_core".into()
            }]
        );
        assert_eq!(extraction.artifacts.len(), 1);
        assert!(extraction.into_result().is_err());
    }

    #[test]
    fn test_escaping_paths_are_warnings() {
        let raw = "write_file(path=\"../../etc/passwd\", content=\"x\")\nwrite_file(path=\"/abs.txt\", content=\"y\")";
        let extraction = extract(raw, &ProtectedPaths::builtin());
        assert!(extraction.artifacts.is_empty());
        assert!(extraction.conflicts.is_empty());
        assert_eq!(extraction.warnings.len(), 2);
        assert!(extraction.warnings.iter().all(|w| w.kind == WarningKind::UnsafePath));
    }

    #[test]
    fn test_paths_are_normalized_before_comparison() {
        let raw = "```text path=./docs\\a.md\none\n```\n```text path=docs/a.md\ntwo\n```\n";
        let extraction = extract(raw, &ProtectedPaths::builtin());
        assert_eq!(extraction.artifacts[0].path, "docs/a.md");
        assert_eq!(extraction.warnings.len(), 1);
    }

    #[test]
    fn test_admit_applies_same_rules() {
        let extractor = ArtifactExtractor::default();
        let extraction = extractor.admit(vec![
            Candidate {
                path: "src/lib.rs".into(),
                content: "pub fn a() {}".into(),
                strategy: StrategyKind::ToolCall,
                line: None,
            },
            Candidate {
                path: "Cargo.toml".into(),
                content: "[package]".into(),
                strategy: StrategyKind::ToolCall,
                line: None,
            },
        ]);
        assert_eq!(extraction.artifacts.len(), 1);
        assert_eq!(extraction.conflicts.len(), 1);
    }

    #[test]
    fn test_plain_prose_yields_nothing() {
        let extraction = extract("All done, no files needed.", &ProtectedPaths::builtin());
        assert_eq!(extraction, Extraction::default());
    }

    fn fragment() -> impl Strategy<Value = String> {
        let name = "[a-z]{1,6}\\.(txt|rs|py)";
        let bare = "[A-Za-z_]{1,8}";
        let body = "[a-zA-Z0-9 =]{0,20}";
        prop_oneof![
            (name, body).prop_map(|(n, b)| format!("```text path={n}\n{b}\n```\n")),
            (name, body).prop_map(|(n, b)| format!("write_file(path=\"{n}\", content=\"{b}\")\n")),
            (name, body).prop_map(|(n, b)| format!("### File (`{n}`)\n```\n{b}\n```\n")),
            body.prop_map(|b| format!("{b}\n")),
            (bare, body).prop_map(|(n, b)| format!("```text path={n}\n{b}\n```\n")),
            body.prop_map(|b| format!("```make:Makefile\n{b}\n```\n")),
            Just("```text path=Cargo.toml\n[workspace]\n```\n".to_string()),
            Just("write_file(path=\"x\n".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_extraction_is_deterministic(parts in prop::collection::vec(fragment(), 0..8)) {
            let raw = parts.concat();
            let protected = ProtectedPaths::builtin();
            prop_assert_eq!(extract(&raw, &protected), extract(&raw, &protected));
        }

        #[test]
        fn prop_no_artifact_targets_protected_path(parts in prop::collection::vec(fragment(), 0..8)) {
            let raw = parts.concat();
            let protected = ProtectedPaths::builtin().with_entries(["a.txt", "Makefile", "core"]);
            let extraction = extract(&raw, &protected);
            for artifact in &extraction.artifacts {
                prop_assert!(!protected.is_protected(&artifact.path));
            }
        }

        #[test]
        fn prop_protected_bare_name_is_conflict(
            name in "[A-Za-z_]{1,12}",
            parts in prop::collection::vec(fragment(), 0..4),
        ) {
            let raw = format!("{}```text path={name}\ndata\n```\n", parts.concat());
            let protected = ProtectedPaths::builtin().with_entries([name.as_str()]);
            let extraction = extract(&raw, &protected);
            let expected = ArtifactConflict::ProtectedPath { path: name };
            prop_assert!(extraction.conflicts.contains(&expected));
        }

        #[test]
        fn prop_paths_are_unique(parts in prop::collection::vec(fragment(), 0..8)) {
            let extraction = extract(&parts.concat(), &ProtectedPaths::builtin());
            let mut paths: Vec<&str> = extraction.artifacts.iter().map(|a| a.path.as_str()).collect();
            let before = paths.len();
            paths.sort_unstable();
            paths.dedup();
            prop_assert_eq!(before, paths.len());
        }
    }
}
