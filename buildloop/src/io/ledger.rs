//! Append-only progress ledger (`progress.txt`) for operators.
//!
//! The ledger is an audit trail. The controller never reads it back; its
//! in-memory history is what callers receive.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::types::IterationRecord;

pub const LEDGER_HEADER: &str = "# Progress Log\n\n";

#[derive(Debug, Clone)]
pub struct ProgressLedger {
    path: PathBuf,
}

impl ProgressLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the ledger with its header if missing. Existing content is kept.
    pub fn ensure(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        debug!(path = %self.path.display(), "creating progress ledger");
        fs::write(&self.path, LEDGER_HEADER)
            .with_context(|| format!("write {}", self.path.display()))
    }

    pub fn append(&self, record: &IterationRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(render_entry(record).as_bytes())
            .with_context(|| format!("append to {}", self.path.display()))
    }
}

fn render_entry(record: &IterationRecord) -> String {
    format!(
        "\n## Iteration {} ({})\n- Status: {}\n- Details: {}\n",
        record.index,
        display_time(&record.timestamp),
        record.status.as_str(),
        record.details
    )
}

/// Human-readable UTC time, falling back to the raw stamp if it is not RFC 3339.
fn display_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| {
            parsed
                .with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
        })
        .unwrap_or_else(|_| timestamp.to_string())
}
