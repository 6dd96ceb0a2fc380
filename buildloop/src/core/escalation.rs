//! Denial streak tracking and escalation directives.

use crate::core::types::{IterationRecord, IterationStatus};

/// Consecutive denials after which every payload carries an escalation directive.
pub const ESCALATION_THRESHOLD: u32 = 3;

/// Counts consecutive reviewer denials for one run.
///
/// Only explicit denials move the counter forward and only approvals reset it.
/// Timeouts, agent errors and missing verdicts leave it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenialTracker {
    streak: u32,
    last_reason: Option<String>,
}

impl DenialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the tracker state implied by a recorded history.
    pub fn replay<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a IterationRecord>,
    {
        let mut tracker = Self::new();
        for record in records {
            tracker.observe(record.status, &record.details);
        }
        tracker
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    pub fn on_denied(&mut self, reason: &str) {
        self.streak += 1;
        self.last_reason = Some(reason.to_string());
    }

    pub fn on_resolved(&mut self) {
        self.streak = 0;
        self.last_reason = None;
    }

    /// Apply the streak transition for one classified iteration.
    pub fn observe(&mut self, status: IterationStatus, details: &str) {
        match status {
            IterationStatus::Denied => self.on_denied(details),
            status if status.is_approval() => self.on_resolved(),
            _ => {}
        }
    }

    /// Level-triggered: stays true for every iteration until the streak resets.
    pub fn should_escalate(&self) -> bool {
        self.streak >= ESCALATION_THRESHOLD
    }

    /// Directive appended to the build instructions while escalated.
    pub fn escalation_text(&self) -> String {
        let mut text = format!(
            "\n\n## ESCALATION: {streak} consecutive denials\n\nThe reviewer has denied the last {streak} iterations.\n",
            streak = self.streak
        );
        if let Some(reason) = &self.last_reason {
            text.push_str("Most recent denial reason:\n> ");
            text.push_str(reason);
            text.push('\n');
        }
        text.push_str(ESCALATION_GUIDANCE);
        text
    }
}

const ESCALATION_GUIDANCE: &str = "\nYour previous approach is NOT working. Try a fundamentally different strategy:\n\
- Re-read the denial reason carefully and address it literally, not approximately\n\
- Reduce scope: fix ONLY the denied items before attempting new work\n\
- Simplify: if the implementation is complex, try a simpler approach\n\
- Do not repeat approaches that already failed (check the gotchas in AGENTS.md)\n";
