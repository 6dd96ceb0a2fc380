//! Per-iteration records under `.buildloop/runs/<run-id>/<index>/`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;

use crate::core::types::IterationRecord;
use crate::io::paths::ProjectPaths;

/// Files written for one iteration.
#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub agent_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(paths: &ProjectPaths, run_id: &str, index: u32) -> Self {
        let dir = paths.iteration_dir(run_id, index);
        Self {
            meta_path: dir.join("meta.json"),
            agent_log_path: dir.join("agent.log"),
            dir,
        }
    }
}

/// Sortable run identifier derived from the current UTC time.
pub fn new_run_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Claim a fresh run directory and return its id.
///
/// A run started in the same millisecond as an existing one gets a `-NN` suffix,
/// so records of different runs never share a directory.
pub fn start_run(paths: &ProjectPaths) -> Result<String> {
    claim_run_dir(paths, &new_run_id())
}

fn claim_run_dir(paths: &ProjectPaths, base: &str) -> Result<String> {
    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create directory {}", paths.runs_dir.display()))?;
    for attempt in 0..100u32 {
        let run_id = if attempt == 0 {
            base.to_string()
        } else {
            format!("{base}-{attempt:02}")
        };
        let run_dir = paths.run_dir(&run_id);
        match fs::create_dir(&run_dir) {
            Ok(()) => return Ok(run_id),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create run dir {}", run_dir.display()));
            }
        }
    }
    Err(anyhow!("no free run id for {base}"))
}

/// Written atomically so `history` never reads a partial record mid-run.
pub fn write_record(paths: &ProjectPaths, run_id: &str, record: &IterationRecord) -> Result<()> {
    let iter_paths = IterationPaths::new(paths, run_id, record.index);
    let mut buf = serde_json::to_string_pretty(record).context("serialize iteration record")?;
    buf.push('\n');
    super::write_atomic(&iter_paths.meta_path, &buf)
}

/// Most recent run id, if any run has been recorded.
pub fn latest_run_id(paths: &ProjectPaths) -> Result<Option<String>> {
    if !paths.runs_dir.is_dir() {
        return Ok(None);
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(&paths.runs_dir)
        .with_context(|| format!("read {}", paths.runs_dir.display()))?
    {
        let entry = entry.with_context(|| format!("read entry in {}", paths.runs_dir.display()))?;
        if entry.path().is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    Ok(ids.pop())
}

/// Load every recorded iteration of `run_id`, ordered by index.
pub fn load_run_history(paths: &ProjectPaths, run_id: &str) -> Result<Vec<IterationRecord>> {
    let run_dir = paths.run_dir(run_id);
    if !run_dir.is_dir() {
        return Err(anyhow!("no recorded run {run_id}"));
    }
    let mut records = Vec::new();
    for entry in fs::read_dir(&run_dir).with_context(|| format!("read {}", run_dir.display()))? {
        let meta_path = entry
            .with_context(|| format!("read entry in {}", run_dir.display()))?
            .path()
            .join("meta.json");
        if meta_path.is_file() {
            records.push(read_record(&meta_path)?);
        }
    }
    records.sort_by_key(|record| record.index);
    Ok(records)
}

fn read_record(path: &Path) -> Result<IterationRecord> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
