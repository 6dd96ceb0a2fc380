//! Side-effecting adapters: filesystem artifacts and the agent process.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod agent;
pub mod checklist;
pub mod config;
pub mod init;
pub mod iteration_log;
pub mod ledger;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod verdict_store;

/// Write `contents` to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
