//! Independent parsers that recover write intents from raw text.
//!
//! Each strategy scans the whole text on its own and reports candidates in
//! source order. Priority between strategies is decided by the caller.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::{ExtractionWarning, WarningKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// `write_file(path=..., content=...)` directives
    InlineWrite,
    /// Code fences carrying a target path
    AnnotatedFence,
    /// Headings naming a file, followed by a code fence
    HeadingSection,
    /// Structured `write_artifact` tool calls
    ToolCall,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InlineWrite => "inline write",
            Self::AnnotatedFence => "annotated fence",
            Self::HeadingSection => "heading section",
            Self::ToolCall => "tool call",
        };
        f.write_str(name)
    }
}

/// A proposed write before safety and priority checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: String,
    pub content: String,
    pub strategy: StrategyKind,
    /// 1-based line where the fragment starts
    pub line: Option<usize>,
}

#[derive(Debug, Default)]
pub struct Scan {
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<ExtractionWarning>,
}

pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn scan(&self, text: &str) -> Scan;
}

/// The built-in strategies in priority order
#[must_use]
pub fn default_strategies() -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(InlineWriteStrategy),
        Box::new(AnnotatedFenceStrategy),
        Box::new(HeadingSectionStrategy),
    ]
}

static WRITE_FILE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)write_file\s*\(\s*(?:file_path|path)\s*=\s*["']([^"'\n]+)["']\s*,\s*content\s*=\s*(?:"""(?P<triple>.*?)"""|"(?P<dq>(?:[^"\\]|\\.)*)"|'(?P<sq>(?:[^'\\]|\\.)*)')\s*\)"#,
    )
    .expect("valid regex")
});

static WRITE_FILE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"write_file\s*\(").expect("valid regex"));

static INFO_KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|\s)(?:path|file|filename|title)\s*=\s*(?:"([^"]+)"|'([^']+)'|(\S+))"#)
        .expect("valid regex")
});

static HEADING_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`\s]+)`|\(([^()`\s]+)\)").expect("valid regex"));

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}

/// Trim, unescape quotes and drop a surrounding code fence
#[must_use]
pub fn clean_content(content: &str) -> String {
    let content = content.trim().replace("\\\"", "\"").replace("\\'", "'");
    if !content.starts_with("```") {
        return content;
    }
    let mut lines: Vec<&str> = content.lines().collect();
    if !lines.is_empty() {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n")
}

/// Shape check for a token explicitly labelled as a path.
///
/// Accepts extensionless names such as `Makefile` or `LICENSE`.
#[must_use]
pub fn is_path_token(token: &str) -> bool {
    let token = token.trim();
    !token.is_empty()
        && token.len() <= 255
        && !token.ends_with('.')
        && !token.starts_with('!')
        && !token.contains("://")
        && token.chars().any(|c| c.is_ascii_alphanumeric())
        && token
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | '\\'))
}

/// Loose check that an unlabelled token names a file rather than prose
#[must_use]
pub fn looks_like_path(token: &str) -> bool {
    is_path_token(token) && (token.contains('.') || token.contains('/'))
}

pub struct InlineWriteStrategy;

impl ExtractionStrategy for InlineWriteStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::InlineWrite
    }

    fn scan(&self, text: &str) -> Scan {
        let mut scan = Scan::default();
        let mut matched = Vec::new();

        for caps in WRITE_FILE_CALL.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            matched.push(whole.range());
            let path = caps.get(1).map_or("", |m| m.as_str());
            let body = caps
                .name("triple")
                .or_else(|| caps.name("dq"))
                .or_else(|| caps.name("sq"))
                .map_or("", |m| m.as_str());
            scan.candidates.push(Candidate {
                path: path.to_string(),
                content: clean_content(body),
                strategy: self.kind(),
                line: Some(line_of(text, whole.start())),
            });
        }

        for start in WRITE_FILE_START.find_iter(text) {
            if !matched.iter().any(|r| r.contains(&start.start())) {
                scan.warnings.push(ExtractionWarning::new(
                    WarningKind::Unparseable,
                    None,
                    self.kind(),
                    Some(line_of(text, start.start())),
                    "malformed write_file directive",
                ));
            }
        }
        scan
    }
}

/// One fenced code block
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fence<'a> {
    pub info: &'a str,
    /// 0-based index of the opening line
    pub open: usize,
    pub body: Vec<&'a str>,
}

#[derive(Debug, Default)]
pub(crate) struct FenceScan<'a> {
    pub fences: Vec<Fence<'a>>,
    /// 0-based opening line of a fence that never closes
    pub unterminated: Option<usize>,
}

pub(crate) fn scan_fences<'a>(lines: &[&'a str]) -> FenceScan<'a> {
    let mut scan = FenceScan::default();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim_start();
        let Some(info) = trimmed.strip_prefix("```") else {
            i += 1;
            continue;
        };
        let close = (i + 1..lines.len()).find(|&j| lines[j].trim() == "```");
        match close {
            Some(end) => {
                scan.fences.push(Fence {
                    info: info.trim(),
                    open: i,
                    body: lines[i + 1..end].to_vec(),
                });
                i = end + 1;
            }
            None => {
                scan.unterminated = Some(i);
                break;
            }
        }
    }
    scan
}

/// Target path named by a fence's info string
fn path_from_info(info: &str) -> Option<String> {
    if let Some(caps) = INFO_KEY_VALUE.captures(info) {
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())?;
        return is_path_token(value).then(|| value.to_string());
    }
    // `lang:path`, e.g. ```rust:src/main.rs
    let first = info.split_whitespace().next()?;
    let (_, path) = first.split_once(':')?;
    is_path_token(path).then(|| path.to_string())
}

/// Target path named by a leading comment line
fn path_from_comment(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = ["//", "--", "#"]
        .iter()
        .find_map(|marker| trimmed.strip_prefix(marker))?;
    let candidate = rest.trim();
    match candidate
        .strip_prefix("file:")
        .or_else(|| candidate.strip_prefix("File:"))
    {
        Some(labelled) => {
            let labelled = labelled.trim();
            is_path_token(labelled).then(|| labelled.to_string())
        }
        None => looks_like_path(candidate).then(|| candidate.to_string()),
    }
}

pub struct AnnotatedFenceStrategy;

impl AnnotatedFenceStrategy {
    /// Path and body of an annotated fence; `None` when not annotated
    pub(crate) fn annotation(fence: &Fence<'_>) -> Option<(String, String)> {
        if let Some(path) = path_from_info(fence.info) {
            return Some((path, fence.body.join("\n")));
        }
        let first = fence.body.iter().position(|l| !l.trim().is_empty())?;
        let path = path_from_comment(fence.body[first])?;
        Some((path, fence.body[first + 1..].join("\n")))
    }
}

impl ExtractionStrategy for AnnotatedFenceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AnnotatedFence
    }

    fn scan(&self, text: &str) -> Scan {
        let lines: Vec<&str> = text.lines().collect();
        let fences = scan_fences(&lines);
        let mut scan = Scan::default();

        for fence in &fences.fences {
            if let Some((path, body)) = Self::annotation(fence) {
                scan.candidates.push(Candidate {
                    path,
                    content: clean_content(&body),
                    strategy: self.kind(),
                    line: Some(fence.open + 1),
                });
            }
        }
        if let Some(open) = fences.unterminated {
            scan.warnings.push(ExtractionWarning::new(
                WarningKind::Unparseable,
                None,
                self.kind(),
                Some(open + 1),
                "code fence is never closed",
            ));
        }
        scan
    }
}

pub struct HeadingSectionStrategy;

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ')
}

fn heading_filename(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("###") {
        return None;
    }
    HEADING_FILENAME.captures_iter(trimmed).find_map(|caps| {
        let token = caps.get(1).or_else(|| caps.get(2))?.as_str();
        looks_like_path(token).then(|| token.to_string())
    })
}

impl ExtractionStrategy for HeadingSectionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HeadingSection
    }

    fn scan(&self, text: &str) -> Scan {
        let lines: Vec<&str> = text.lines().collect();
        let fences = scan_fences(&lines).fences;
        let mut scan = Scan::default();

        // Headings inside code blocks are code, not structure
        let in_fence = |index: usize| {
            fences
                .iter()
                .any(|f| index > f.open && index <= f.open + f.body.len())
        };

        for (index, line) in lines.iter().enumerate() {
            let Some(path) = heading_filename(line) else {
                continue;
            };
            if in_fence(index) {
                continue;
            }
            let next_heading = (index + 1..lines.len())
                .find(|&j| !in_fence(j) && is_heading(lines[j]))
                .unwrap_or(lines.len());
            let fence = fences
                .iter()
                .find(|f| f.open > index && f.open < next_heading);
            match fence {
                // Annotated fences belong to the fence strategy
                Some(f) if AnnotatedFenceStrategy::annotation(f).is_some() => {}
                Some(f) => scan.candidates.push(Candidate {
                    path,
                    content: clean_content(&f.body.join("\n")),
                    strategy: self.kind(),
                    line: Some(index + 1),
                }),
                None => scan.warnings.push(ExtractionWarning::new(
                    WarningKind::Unparseable,
                    Some(path),
                    self.kind(),
                    Some(index + 1),
                    "heading names a file but no code block follows",
                )),
            }
        }
        scan
    }
}
