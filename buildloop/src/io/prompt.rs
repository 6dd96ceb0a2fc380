//! Instruction payload assembly for one iteration.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::escalation::DenialTracker;

/// Read the build instructions fresh and append the escalation directive when due.
///
/// The instructions are never replaced; escalation only adds to them.
pub fn build_iteration_prompt(build_prompt: &Path, tracker: &DenialTracker) -> Result<String> {
    let mut prompt = fs::read_to_string(build_prompt)
        .with_context(|| format!("read build instructions {}", build_prompt.display()))?;
    if prompt.trim().is_empty() {
        return Err(anyhow!(
            "build instructions {} are empty",
            build_prompt.display()
        ));
    }
    if tracker.should_escalate() {
        debug!(streak = tracker.streak(), "appending escalation directive");
        prompt.push_str(&tracker.escalation_text());
    }
    Ok(prompt)
}
