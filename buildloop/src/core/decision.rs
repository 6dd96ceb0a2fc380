//! Classification of a finished agent turn into an iteration status.
//!
//! Success needs two keys turned in the same iteration: the reviewer's approval
//! and the agent's own completion claim. Either one alone is `approved_partial`.

use crate::core::types::{IterationStatus, Verdict};

/// Sentinel the agent prints when it believes every checklist item is done.
pub const COMPLETION_SIGNAL: &str = "<promise>COMPLETE</promise>";

const NO_VERDICT_DETAILS: &str = "Reviewer did not produce a verdict";
const DEFAULT_COMPLETE_SUMMARY: &str = "All items complete";
const DEFAULT_PARTIAL_SUMMARY: &str = "Partial progress";
const DEFAULT_DENIAL_REASON: &str = "No reason provided";

/// Classification of a turn whose agent call returned successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub status: IterationStatus,
    pub details: String,
}

/// Plain substring check against the agent's stdout.
pub fn claims_completion(stdout: &str) -> bool {
    stdout.contains(COMPLETION_SIGNAL)
}

pub fn judge(verdict: &Verdict, completion_claimed: bool) -> Judgment {
    match verdict {
        Verdict::Absent => Judgment {
            status: IterationStatus::NoVerdict,
            details: NO_VERDICT_DETAILS.to_string(),
        },
        Verdict::Approved { summary, .. } if completion_claimed => Judgment {
            status: IterationStatus::Approved,
            details: non_empty_or(summary, DEFAULT_COMPLETE_SUMMARY),
        },
        // TODO: surface the reviewer's summary as a distinct partial reason once
        // callers stop reading `details` as the only explanation.
        Verdict::Approved { summary, .. } => Judgment {
            status: IterationStatus::ApprovedPartial,
            details: non_empty_or(summary, DEFAULT_PARTIAL_SUMMARY),
        },
        Verdict::Denied { reason, .. } => Judgment {
            status: IterationStatus::Denied,
            details: non_empty_or(reason, DEFAULT_DENIAL_REASON),
        },
    }
}

/// Reviewer text is kept verbatim; only blank text falls back to the default.
fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
