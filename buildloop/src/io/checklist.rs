//! Checkbox progress of the PRD checklist in `prds/*.md`.
//!
//! The checklist is owned by the agent. The loop only reads it for display and
//! never caches it between iterations.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

static CHECKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*[-*] \[x\] (.+)$").unwrap());
static UNCHECKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*] \[ \] (.+)$").unwrap());
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\s+(.+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistItem {
    pub text: String,
    pub done: bool,
}

/// Progress of one PRD file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistFile {
    pub filename: String,
    pub title: String,
    pub items: Vec<ChecklistItem>,
}

impl ChecklistFile {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn done(&self) -> usize {
        self.items.iter().filter(|item| item.done).count()
    }

    pub fn percent(&self) -> u32 {
        percent(self.done(), self.total())
    }
}

/// Aggregate `(done, total)` across files.
pub fn totals(files: &[ChecklistFile]) -> (usize, usize) {
    files.iter().fold((0, 0), |(done, total), file| {
        (done + file.done(), total + file.total())
    })
}

pub fn percent(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((done * 100) / total) as u32
}

/// Parse every `*.md` file in `prds_dir`, sorted by file name.
///
/// A missing directory (e.g. before PRDs are generated) yields an empty list.
pub fn read_checklist(prds_dir: &Path) -> Result<Vec<ChecklistFile>> {
    if !prds_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut md_files = Vec::new();
    for entry in fs::read_dir(prds_dir).with_context(|| format!("read {}", prds_dir.display()))? {
        let path = entry
            .with_context(|| format!("read entry in {}", prds_dir.display()))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            md_files.push(path);
        }
    }
    md_files.sort();

    md_files
        .iter()
        .map(|path| {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let filename = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(parse_checklist(&filename, &stem, &contents))
        })
        .collect()
}

/// Title is the first H1 (falling back to `default_title`); items are checkbox lines.
pub fn parse_checklist(filename: &str, default_title: &str, contents: &str) -> ChecklistFile {
    let mut title = None;
    let mut items = Vec::new();
    for line in contents.lines() {
        if title.is_none()
            && let Some(caps) = HEADING_RE.captures(line)
        {
            title = Some(caps[1].trim().to_string());
        }
        if let Some(caps) = CHECKED_RE.captures(line) {
            items.push(ChecklistItem {
                text: caps[1].trim().to_string(),
                done: true,
            });
        } else if let Some(caps) = UNCHECKED_RE.captures(line) {
            items.push(ChecklistItem {
                text: caps[1].trim().to_string(),
                done: false,
            });
        }
    }
    ChecklistFile {
        filename: filename.to_string(),
        title: title.unwrap_or_else(|| default_title.to_string()),
        items,
    }
}
