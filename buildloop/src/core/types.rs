//! Shared types for the build loop.
//!
//! These types define the contracts between the controller, the verdict store,
//! the progress ledger and callers. They carry no I/O.

use serde::{Deserialize, Serialize};

/// Reviewer decision for a single iteration, decided once at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    /// The reviewer signed off on the work.
    Approved {
        summary: String,
        timestamp: Option<String>,
    },
    /// The reviewer rejected the work.
    Denied {
        reason: String,
        timestamp: Option<String>,
    },
    /// No usable verdict was recorded (missing, unreadable or malformed).
    Absent,
}

impl Verdict {
    pub fn is_present(&self) -> bool {
        !matches!(self, Verdict::Absent)
    }

    pub fn timestamp(&self) -> Option<&str> {
        match self {
            Verdict::Approved { timestamp, .. } | Verdict::Denied { timestamp, .. } => {
                timestamp.as_deref()
            }
            Verdict::Absent => None,
        }
    }
}

/// Outcome classification of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    /// Reviewer approved and the agent claimed completion. Terminal.
    Approved,
    /// Reviewer approved but checklist items remain.
    ApprovedPartial,
    /// Reviewer denied the work.
    Denied,
    /// The agent finished but no usable verdict was recorded.
    NoVerdict,
    /// The agent exited unsuccessfully or could not be invoked.
    Error,
    /// The agent exceeded the per-iteration timeout.
    Timeout,
}

impl IterationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IterationStatus::Approved => "approved",
            IterationStatus::ApprovedPartial => "approved_partial",
            IterationStatus::Denied => "denied",
            IterationStatus::NoVerdict => "no_verdict",
            IterationStatus::Error => "error",
            IterationStatus::Timeout => "timeout",
        }
    }

    /// True for reviewer judgments that reset the denial streak.
    pub fn is_approval(self) -> bool {
        matches!(
            self,
            IterationStatus::Approved | IterationStatus::ApprovedPartial
        )
    }
}

/// Immutable record of one iteration, appended once to the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration number (1-indexed, monotonically increasing).
    pub index: u32,
    pub status: IterationStatus,
    pub details: String,
    /// RFC 3339 UTC timestamp taken when the iteration started.
    pub timestamp: String,
    pub verdict: Verdict,
}

/// Terminal output of a build loop run.
///
/// `success` is true only when some iteration ended `approved`. `error` is set
/// only when the run stopped by exhausting its iteration budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub iterations_used: u32,
    pub final_verdict: Verdict,
    pub error: Option<String>,
    pub history: Vec<IterationRecord>,
    pub final_denial_streak: u32,
}
